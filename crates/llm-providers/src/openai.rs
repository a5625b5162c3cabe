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
use llm_contracts::{LLMError, LLMResult, Message, ProviderRequest, ProviderResponse, Usage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::http::{build_http_client, send_json};
use crate::ApiClient;

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(flatten)]
    extra: &'a HashMap<String, Value>,
}

impl<'a> From<&'a ProviderRequest> for CompletionBody<'a> {
    fn from(request: &'a ProviderRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.as_deref(),
            extra: &request.provider_specific,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Chat-completions client for the OpenAI API (or any compatible endpoint).
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAIClient {
    pub fn new(api_key: String, base_url: impl Into<String>, timeout: Duration) -> LLMResult<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: base_url.into(),
            timeout,
        })
    }

    fn into_response(raw: Value, model: String) -> LLMResult<ProviderResponse> {
        let reply: CompletionReply = serde_json::from_value(raw.clone())
            .map_err(|e| LLMError::Provider(format!("Unexpected OpenAI completion shape: {e}")))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Provider("OpenAI returned no choices".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(LLMError::Provider(
                "OpenAI refused the request (content_filter)".to_string(),
            ));
        }
        let content = choice.message.content.ok_or_else(|| {
            LLMError::Provider("OpenAI choice carries no message content".to_string())
        })?;

        let usage = reply.usage.unwrap_or_default();
        Ok(ProviderResponse {
            content,
            model,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
            finish_reason: choice.finish_reason,
            raw_response: raw,
        })
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionBody::from(&request));

        let raw = send_json(self.provider_name(), builder, self.timeout).await?;
        let response = Self::into_response(raw, request.model)?;
        info!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "OpenAI completion received"
        );
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let url = format!("{}/models", self.base_url);
        send_json(
            self.provider_name(),
            self.client.get(&url).bearer_auth(&self.api_key),
            self.timeout,
        )
        .await?;
        debug!("OpenAI models endpoint reachable");
        Ok(())
    }
}
