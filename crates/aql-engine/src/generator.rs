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

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{GenerationError, ProviderError};
use crate::feedback::FeedbackRecord;
use crate::logging::log_generation_attempt;
use crate::provider::ProviderDescriptor;
use crate::types::{GenerationAttempt, Question};

/// Runs one provider translation with a deadline and a single transport retry.
#[derive(Debug, Clone)]
pub struct QueryGenerator {
    timeout: Duration,
    transport_retries: u32,
}

impl Default for QueryGenerator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl QueryGenerator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            transport_retries: 1,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn generate(
        &self,
        question: &Question,
        descriptor: &ProviderDescriptor,
        feedback: Option<&FeedbackRecord>,
        attempt_number: u32,
    ) -> Result<GenerationAttempt, GenerationError> {
        let fail = |cause: ProviderError| GenerationError {
            attempt: attempt_number,
            provider: descriptor.kind,
            cause,
        };

        let mut call = 0;
        loop {
            debug!(
                attempt = attempt_number,
                call = call + 1,
                provider = %descriptor.kind,
                repair = feedback.is_some(),
                "Requesting translation"
            );

            let outcome = match tokio::time::timeout(
                self.timeout,
                descriptor.provider.translate(question, feedback),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match outcome {
                Ok(translation) => {
                    let query = translation.query.trim().to_string();
                    if query.is_empty() {
                        return Err(fail(ProviderError::Malformed(
                            "provider returned an empty query".to_string(),
                        )));
                    }
                    log_generation_attempt(attempt_number, descriptor.kind, &query);
                    return Ok(GenerationAttempt {
                        attempt_number,
                        query,
                        explanation: translation.explanation,
                        timestamp: Utc::now(),
                    });
                }
                Err(cause) if cause.is_transient() && call < self.transport_retries => {
                    warn!(
                        attempt = attempt_number,
                        provider = %descriptor.kind,
                        error = %cause,
                        "Transient provider failure, retrying once"
                    );
                    call += 1;
                }
                Err(cause) => return Err(fail(cause)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, MockReply};
    use std::sync::Arc;

    fn descriptor(provider: MockProvider) -> (ProviderDescriptor, Arc<MockProvider>) {
        let provider = Arc::new(provider);
        (ProviderDescriptor::new(provider.clone()), provider)
    }

    #[tokio::test]
    async fn transport_failure_is_retried_once() {
        let (descriptor, mock) = descriptor(MockProvider::new().with_replies([
            MockReply::Error(ProviderError::Transport("connection reset".to_string())),
            MockReply::query("SELECT name"),
        ]));

        let attempt = QueryGenerator::default()
            .generate(&Question::new("names"), &descriptor, None, 1)
            .await
            .unwrap();
        assert_eq!(attempt.query, "SELECT name");
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn second_transport_failure_is_reported() {
        let (descriptor, mock) = descriptor(MockProvider::new().with_replies([
            MockReply::Error(ProviderError::Timeout),
            MockReply::Error(ProviderError::Transport("down".to_string())),
        ]));

        let err = QueryGenerator::default()
            .generate(&Question::new("names"), &descriptor, None, 3)
            .await
            .unwrap_err();
        assert_eq!(err.attempt, 3);
        assert_eq!(err.cause, ProviderError::Transport("down".to_string()));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_output_is_not_retried() {
        let (descriptor, mock) = descriptor(
            MockProvider::new().with_replies([MockReply::Raw("I cannot help with that".to_string())]),
        );

        let err = QueryGenerator::default()
            .generate(&Question::new("names"), &descriptor, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err.cause, ProviderError::Malformed(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let (descriptor, mock) =
            descriptor(MockProvider::new().with_delay(Duration::from_secs(120)));

        let err = QueryGenerator::new(Duration::from_secs(5))
            .generate(&Question::new("names"), &descriptor, None, 1)
            .await
            .unwrap_err();
        assert_eq!(err.cause, ProviderError::Timeout);
        assert_eq!(mock.call_count(), 2);
    }
}
