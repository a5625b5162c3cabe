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

pub mod anthropic;
mod http;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use llm_contracts::{
    LLMError, LLMResult, ProviderKind, ProviderRequest, ProviderResponse, ProviderSettings,
};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    fn provider_name(&self) -> &'static str;

    async fn health_check(&self) -> LLMResult<()>;
}

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

pub fn build_client(
    kind: ProviderKind,
    settings: &ProviderSettings,
    api_key: Option<String>,
    timeout: Duration,
) -> LLMResult<Arc<dyn ApiClient>> {
    match kind {
        ProviderKind::OpenAI => {
            let key = require_key(kind, api_key)?;
            Ok(Arc::new(OpenAIClient::new(
                key,
                settings.trimmed_base_url(),
                timeout,
            )?))
        }
        ProviderKind::Claude => {
            let key = require_key(kind, api_key)?;
            let mut client = AnthropicClient::new(key, settings.trimmed_base_url(), timeout)?;
            if let Some(version) = &settings.api_version {
                client = client.with_api_version(version.clone());
            }
            Ok(Arc::new(client))
        }
        ProviderKind::Ollama => Ok(Arc::new(OllamaClient::new(
            settings.trimmed_base_url(),
            timeout,
        )?)),
        ProviderKind::Mock => Err(LLMError::Configuration(
            "The mock provider has no HTTP client".to_string(),
        )),
    }
}

fn require_key(kind: ProviderKind, api_key: Option<String>) -> LLMResult<String> {
    match api_key {
        Some(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(LLMError::Authentication(format!(
            "No API key configured for {kind}"
        ))),
    }
}
