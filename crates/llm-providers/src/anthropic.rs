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
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::http::{build_http_client, send_json};
use crate::ApiClient;

const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// The Messages API takes the system prompt as a top-level field.
#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    messages: Vec<&'a Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
    #[serde(flatten)]
    extra: &'a HashMap<String, Value>,
}

impl<'a> From<&'a ProviderRequest> for MessagesBody<'a> {
    fn from(request: &'a ProviderRequest) -> Self {
        Self {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != "system")
                .collect(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: request.system_prompt(),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.as_deref(),
            extra: &request.provider_specific,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    api_version: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: impl Into<String>, timeout: Duration) -> LLMResult<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: base_url.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout,
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
    }

    fn into_response(raw: Value, model: String) -> LLMResult<ProviderResponse> {
        let reply: MessagesReply = serde_json::from_value(raw.clone())
            .map_err(|e| LLMError::Provider(format!("Unexpected Claude message shape: {e}")))?;

        let text: Vec<String> = reply
            .content
            .into_iter()
            .filter(|block| block.kind.is_empty() || block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(LLMError::Provider(
                "Claude reply contains no text block".to_string(),
            ));
        }

        let usage = reply.usage.unwrap_or_default();
        Ok(ProviderResponse {
            content: text.join(""),
            model,
            usage: Usage::new(usage.input_tokens, usage.output_tokens),
            finish_reason: reply.stop_reason,
            raw_response: raw,
        })
    }
}

#[async_trait]
impl ApiClient for AnthropicClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let url = format!("{}/messages", self.base_url);
        let builder = self
            .authorised(self.client.post(&url))
            .json(&MessagesBody::from(&request));

        let raw = send_json(self.provider_name(), builder, self.timeout).await?;
        let response = Self::into_response(raw, request.model)?;
        info!(
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "Claude completion received"
        );
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let url = format!("{}/models", self.base_url);
        send_json(
            self.provider_name(),
            self.authorised(self.client.get(&url)),
            self.timeout,
        )
        .await?;
        debug!("Claude models endpoint reachable");
        Ok(())
    }
}
