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

use futures::future::join_all;
use llm_contracts::ProviderKind;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ChatProvider, LlmProvider, MockProvider};
use crate::config::AssistantConfig;
use crate::credentials::CredentialStore;
use crate::error::ProviderUnavailableError;

/// A selected provider. Availability is probed once when the descriptor is
/// chosen and is not tracked afterwards; each request selects again.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub provider: Arc<dyn LlmProvider>,
}

impl ProviderDescriptor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            kind: provider.kind(),
            provider,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProviderPreference {
    #[default]
    Auto,
    Named(ProviderKind),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown provider preference '{0}'")]
pub struct UnknownProviderError(pub String);

impl FromStr for ProviderPreference {
    type Err = UnknownProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            return Ok(ProviderPreference::Auto);
        }
        trimmed
            .parse::<ProviderKind>()
            .map(ProviderPreference::Named)
            .map_err(|_| UnknownProviderError(trimmed.to_string()))
    }
}

impl fmt::Display for ProviderPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderPreference::Auto => f.write_str("auto"),
            ProviderPreference::Named(kind) => write!(f, "{kind}"),
        }
    }
}

/// The set of configured backends, kept in priority order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AssistantConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let mut registry = Self::new();
        for kind in [ProviderKind::OpenAI, ProviderKind::Claude, ProviderKind::Ollama] {
            let provider = ChatProvider::new(kind, config.provider_settings(kind), credentials.clone())
                .with_timeout(config.llm.generation_timeout())
                .with_probe_timeout(config.llm.probe_timeout());
            registry.register(Arc::new(provider));
        }
        if config.llm.enable_mock {
            registry.register(Arc::new(MockProvider::new()));
        }
        debug!(providers = registry.len(), "Provider registry built");
        registry
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Replaces any provider of the same kind.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let descriptor = ProviderDescriptor::new(provider);
        self.descriptors.retain(|d| d.kind != descriptor.kind);
        self.descriptors.push(descriptor);
        self.descriptors.sort_by_key(|d| d.kind.priority());
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.descriptors.iter().map(|d| d.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Availability is probed on every call; nothing is cached between requests.
    pub async fn select_provider(
        &self,
        preference: &ProviderPreference,
    ) -> Result<ProviderDescriptor, ProviderUnavailableError> {
        match preference {
            ProviderPreference::Named(kind) => {
                let descriptor = self
                    .get(*kind)
                    .ok_or(ProviderUnavailableError::Requested(*kind))?;
                if descriptor.provider.check_availability().await {
                    info!(provider = %kind, "Using requested provider");
                    Ok(descriptor.clone())
                } else {
                    warn!(provider = %kind, "Requested provider is not available");
                    Err(ProviderUnavailableError::Requested(*kind))
                }
            }
            ProviderPreference::Auto => {
                let mut tried = Vec::with_capacity(self.descriptors.len());
                for descriptor in &self.descriptors {
                    tried.push(descriptor.kind);
                    if descriptor.provider.check_availability().await {
                        info!(provider = %descriptor.kind, "Auto-selected provider");
                        return Ok(descriptor.clone());
                    }
                    debug!(provider = %descriptor.kind, "Provider unavailable, trying next");
                }
                warn!(tried = tried.len(), "No provider available");
                Err(ProviderUnavailableError::TriedAll(tried))
            }
        }
    }

    pub async fn availability(&self) -> Vec<(ProviderKind, bool)> {
        let checks = self.descriptors.iter().map(|d| async move {
            (d.kind, d.provider.check_availability().await)
        });
        join_all(checks).await
    }
}
