// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use async_trait::async_trait;
use llm_contracts::{ProviderKind, ProviderRequest, ProviderSettings};
use llm_providers::{build_client, ApiClient};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::LlmProvider;
use crate::credentials::CredentialStore;
use crate::error::ProviderError;
use crate::feedback::FeedbackRecord;
use crate::prompts::build_messages;
use crate::types::{ProviderOptions, Question, Translation};

/// HTTP client built for a specific key.
struct CachedClient {
    /// Key the client was built with; `None` for Ollama.
    api_key: Option<String>,
    /// The built client.
    client: Arc<dyn ApiClient>,
}

/// Chat-completion backed provider for OpenAI, Claude and Ollama.
pub struct ChatProvider {
    /// Which backend this provider talks to.
    kind: ProviderKind,
    /// Model, base URL and sampling defaults.
    settings: ProviderSettings,
    /// Keys are read per call so rotations take effect.
    credentials: Arc<dyn CredentialStore>,
    /// Limit for one translation request.
    timeout: Duration,
    /// Limit for the availability health check.
    probe_timeout: Duration,
    /// Whether availability needs a network health check.
    probe: bool,
    /// Rebuilt when the key changes.
    client: RwLock<Option<CachedClient>>,
}

impl ChatProvider {
    pub fn new(
        kind: ProviderKind,
        settings: ProviderSettings,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            kind,
            settings,
            credentials,
            timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            // OpenAI is considered available once a key is present.
            probe: kind != ProviderKind::OpenAI,
            client: RwLock::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Current key for cloud providers.
    fn current_key(&self) -> Option<String> {
        if self.kind.is_cloud() {
            self.credentials.api_key(self.kind)
        } else {
            None
        }
    }

    /// Returns the cached client, rebuilding it if the key changed.
    fn client(&self) -> Result<Arc<dyn ApiClient>, ProviderError> {
        let api_key = self.current_key();

        if let Ok(cached) = self.client.read() {
            if let Some(cached) = cached.as_ref() {
                if cached.api_key == api_key {
                    return Ok(cached.client.clone());
                }
            }
        }

        debug!(provider = %self.kind, "Building HTTP client");
        let client = build_client(self.kind, &self.settings, api_key.clone(), self.timeout)?;
        if let Ok(mut slot) = self.client.write() {
            *slot = Some(CachedClient {
                api_key,
                client: client.clone(),
            });
        }
        Ok(client)
    }
}

#[async_trait]
impl LlmProvider for ChatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn options(&self) -> ProviderOptions {
        ProviderOptions {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
        }
    }

    async fn translate(
        &self,
        question: &Question,
        feedback: Option<&FeedbackRecord>,
    ) -> Result<Translation, ProviderError> {
        let client = self.client()?;
        let request = ProviderRequest::new(
            self.settings.model.clone(),
            build_messages(question, feedback),
        )
        .with_max_tokens(self.settings.max_tokens)
        .with_temperature(self.settings.temperature);

        let response = client.send_request(request).await?;
        debug!(
            provider = %self.kind,
            model = %response.model,
            completion_tokens = response.usage.completion_tokens,
            repair = feedback.is_some(),
            "Provider returned translation"
        );
        self.format_response(&response.content)
    }

    async fn check_availability(&self) -> bool {
        if self.kind.is_cloud() && self.current_key().is_none() {
            debug!(provider = %self.kind, "No API key configured");
            return false;
        }
        if !self.probe {
            return true;
        }

        let client = match self.client() {
            Ok(client) => client,
            Err(e) => {
                warn!(provider = %self.kind, error = %e, "Cannot build client for availability probe");
                return false;
            }
        };

        match tokio::time::timeout(self.probe_timeout, client.health_check()).await {
            Ok(Ok(())) => {
                info!(provider = %self.kind, "Provider is available");
                true
            }
            Ok(Err(e)) => {
                warn!(provider = %self.kind, error = %e, "Provider availability probe failed");
                false
            }
            Err(_) => {
                warn!(
                    provider = %self.kind,
                    timeout_secs = self.probe_timeout.as_secs(),
                    "Provider availability probe timed out"
                );
                false
            }
        }
    }
}
