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
use tracing::{debug, info, warn};

use crate::http::{build_http_client, send_json};
use crate::ApiClient;

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "GenerationOptions::is_empty")]
    options: GenerationOptions<'a>,
    #[serde(flatten)]
    extra: &'a HashMap<String, Value>,
}

#[derive(Debug, Default, Serialize)]
struct GenerationOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

impl GenerationOptions<'_> {
    fn is_empty(&self) -> bool {
        self.num_predict.is_none()
            && self.temperature.is_none()
            && self.top_p.is_none()
            && self.stop.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: ReplyMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Client for a local Ollama daemon. No API key is involved.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> LLMResult<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }

    /// Names of the models pulled into the daemon, from `/api/tags`.
    pub async fn available_models(&self) -> LLMResult<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let raw = send_json(self.provider_name(), self.client.get(&url), self.timeout)
            .await
            .map_err(|e| match e {
                LLMError::Network(msg) => {
                    LLMError::Network(format!("Cannot reach Ollama at {}: {msg}", self.base_url))
                }
                other => other,
            })?;

        let tags: TagList = serde_json::from_value(raw).map_err(|e| {
            LLMError::Provider(format!("Unexpected /api/tags payload from Ollama: {e}"))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ApiClient for OllamaClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            options: GenerationOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
                stop: request.stop_sequences.as_deref(),
            },
            extra: &request.provider_specific,
        };
        let url = format!("{}/api/chat", self.base_url);
        let raw = send_json(
            self.provider_name(),
            self.client.post(&url).json(&body),
            self.timeout,
        )
        .await?;

        let reply: ChatReply = serde_json::from_value(raw.clone()).map_err(|e| {
            LLMError::Provider(format!("Ollama reply has no message content: {e}"))
        })?;
        debug!(
            model = %request.model,
            done = reply.done,
            eval_count = reply.eval_count,
            "Ollama chat completed"
        );

        Ok(ProviderResponse {
            content: reply.message.content,
            model: request.model,
            usage: Usage::new(reply.prompt_eval_count, reply.eval_count),
            finish_reason: reply.done.then(|| "stop".to_string()),
            raw_response: raw,
        })
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    async fn health_check(&self) -> LLMResult<()> {
        let models = self.available_models().await?;
        if models.is_empty() {
            warn!(base_url = %self.base_url, "Ollama is running without any pulled models");
            return Err(LLMError::Provider(
                "Ollama has no models available".to_string(),
            ));
        }
        info!(models = models.len(), "Ollama is reachable");
        Ok(())
    }
}
