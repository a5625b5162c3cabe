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

use llm_contracts::{LLMError, LLMResult};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub(crate) fn build_http_client(timeout: Duration) -> LLMResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))
}

/// Sends one request and decodes the JSON body. No retries happen here.
pub(crate) async fn send_json(
    provider: &'static str,
    request: RequestBuilder,
    timeout: Duration,
) -> LLMResult<Value> {
    debug!(provider, timeout_secs = timeout.as_secs(), "Sending request");

    match tokio::time::timeout(timeout, request.send()).await {
        Ok(Ok(resp)) => {
            let status = resp.status();
            debug!(provider, status = %status, "Received response");

            if status.is_success() {
                return resp.json::<Value>().await.map_err(|e| {
                    LLMError::Serialisation(format!("Failed to parse JSON response: {e}"))
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(provider, "Rate limited by provider API");
                return Err(LLMError::RateLimit);
            }

            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => format!("failed to read error body: {e}"),
            };

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Err(LLMError::Authentication(format!(
                    "{provider} API rejected credentials ({status}): {body}"
                )))
            } else if status.is_server_error() {
                Err(LLMError::Network(format!(
                    "{provider} API error {status}: {body}"
                )))
            } else {
                Err(LLMError::Provider(format!(
                    "{provider} API error {status}: {body}"
                )))
            }
        }
        Ok(Err(e)) if e.is_timeout() => {
            warn!(provider, "Request timed out inside the HTTP client");
            Err(LLMError::Timeout)
        }
        Ok(Err(e)) => Err(LLMError::Network(format!("Request failed: {e}"))),
        Err(_) => {
            warn!(
                provider,
                "Request timed out after {} seconds",
                timeout.as_secs()
            );
            Err(LLMError::Timeout)
        }
    }
}
