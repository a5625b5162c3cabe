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

use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{EngineError, EngineResult};
use crate::feedback::FeedbackAccumulator;
use crate::generator::QueryGenerator;
use crate::logging::{log_query_modification, log_query_validation, log_retry_exhausted};
use crate::preprocess::preprocess_query;
use crate::progress::ProgressReporter;
use crate::provider::{ProviderDescriptor, ProviderPreference, ProviderRegistry};
use crate::types::{GeneratedQuery, Question};
use crate::validator::{QueryService, ValidationOutcome};

/// Total number of generate/validate attempts per question.
pub const MAX_RETRIES: u32 = DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Init,
    Generating,
    Validating,
    Repairing,
    Success,
    Exhausted,
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryState::Init => "init",
            RetryState::Generating => "generating",
            RetryState::Validating => "validating",
            RetryState::Repairing => "repairing",
            RetryState::Success => "success",
            RetryState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// Per-execution state; one per question, never shared.
struct Execution<'a> {
    /// Current position in the state machine.
    state: RetryState,
    /// 1-based attempt number.
    attempt: u32,
    /// Failed attempts so far.
    feedback: FeedbackAccumulator,
    /// Checked on every transition.
    cancel: &'a CancellationToken,
}

impl Execution<'_> {
    /// Moves to `next` unless the request was cancelled.
    fn transition(&mut self, next: RetryState) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            info!(state = %self.state, attempt = self.attempt, "Execution abandoned");
            return Err(EngineError::Cancelled);
        }
        debug!(from = %self.state, to = %next, attempt = self.attempt, "Retry state transition");
        self.state = next;
        Ok(())
    }
}

/// Drives Generate -> Validate -> Repair until a query is accepted or the
/// attempt budget runs out.
#[derive(Clone)]
pub struct RetryController {
    service: Arc<dyn QueryService>,
    generator: QueryGenerator,
    max_retries: u32,
}

impl fmt::Debug for RetryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryController")
            .field("generator", &self.generator)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RetryController {
    pub fn new(service: Arc<dyn QueryService>, generator: QueryGenerator) -> Self {
        Self {
            service,
            generator,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Selects a provider, runs the loop and emits the terminal progress event.
    pub async fn run(
        &self,
        question: &Question,
        registry: &ProviderRegistry,
        preference: &ProviderPreference,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> EngineResult<GeneratedQuery> {
        progress.understanding();

        let result = match registry.select_provider(preference).await {
            Ok(descriptor) => self.drive(question, &descriptor, progress, cancel).await,
            Err(e) => Err(e.into()),
        };
        report_outcome(progress, &result);
        result
    }

    /// The attempt loop for an already selected provider. Does not emit a
    /// terminal progress event.
    pub async fn drive(
        &self,
        question: &Question,
        descriptor: &ProviderDescriptor,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> EngineResult<GeneratedQuery> {
        let mut exec = Execution {
            state: RetryState::Init,
            attempt: 1,
            feedback: FeedbackAccumulator::new(),
            cancel,
        };
        let mut previous_query: Option<String> = None;

        loop {
            exec.transition(RetryState::Generating)?;
            progress.generating(exec.attempt);

            let feedback = exec.feedback.build();
            let generated = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.generator.generate(question, descriptor, feedback.as_ref(), exec.attempt) => result,
            };

            let (query, explanation, error, details) = match generated {
                Ok(generated) => {
                    let query = preprocess_query(&generated.query, question.reference_time());
                    if let Some(previous) = previous_query.as_deref() {
                        log_query_modification(exec.attempt, previous, &query);
                    }

                    exec.transition(RetryState::Validating)?;
                    progress.validating(exec.attempt);

                    let outcome = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(EngineError::Cancelled),
                        outcome = self.service.validate(&query) => outcome,
                    };
                    log_query_validation(exec.attempt, &query, &outcome);

                    match outcome {
                        ValidationOutcome::Valid => {
                            exec.transition(RetryState::Success)?;
                            info!(
                                attempts = exec.attempt,
                                provider = %descriptor.kind,
                                "Query accepted by the service"
                            );
                            return Ok(GeneratedQuery {
                                query,
                                explanation: generated.explanation,
                                attempts: exec.attempt,
                                provider: descriptor.kind,
                                history: exec.feedback.history(),
                                cached: false,
                            });
                        }
                        ValidationOutcome::Invalid { message, details } => {
                            (query, generated.explanation, message, details)
                        }
                        ValidationOutcome::TransportFailure { reason } => (
                            query,
                            generated.explanation,
                            format!("Validation service unreachable: {reason}"),
                            json!({"kind": "transport"}),
                        ),
                    }
                }
                Err(e) => {
                    warn!(attempt = exec.attempt, error = %e, "Generation failed");
                    (
                        String::new(),
                        String::new(),
                        e.cause.to_string(),
                        json!({"kind": "generation"}),
                    )
                }
            };

            exec.feedback
                .record_failure(exec.attempt, query.clone(), explanation, error.clone(), details);
            if !query.is_empty() {
                previous_query = Some(query);
            }

            exec.transition(RetryState::Repairing)?;
            if exec.attempt >= self.max_retries {
                exec.state = RetryState::Exhausted;
                log_retry_exhausted(exec.attempt, &error);
                return Err(EngineError::RetryExhausted {
                    last_error: error,
                    attempts: exec.attempt,
                    max_retries: self.max_retries,
                    history: exec.feedback.history(),
                });
            }

            progress.repairing(exec.attempt, &error);
            exec.attempt += 1;
        }
    }
}

/// Emits the single terminal event for a finished execution.
pub fn report_outcome(progress: &ProgressReporter, result: &EngineResult<GeneratedQuery>) {
    match result {
        Ok(generated) => progress.complete(generated.attempts),
        Err(EngineError::RetryExhausted {
            last_error,
            attempts,
            ..
        }) => progress.failed(last_error, *attempts),
        Err(e) => progress.failed(&e.to_string(), e.attempts()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::provider::{MockProvider, MockReply};
    use crate::types::QueryRows;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedService {
        outcomes: Mutex<VecDeque<ValidationOutcome>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(outcomes: impl IntoIterator<Item = ValidationOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl QueryService for ScriptedService {
        async fn validate(&self, query: &str) -> ValidationOutcome {
            self.seen.lock().unwrap().push(query.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ValidationOutcome::Valid)
        }

        async fn execute(&self, _query: &str) -> Result<QueryRows, ServiceError> {
            Ok(QueryRows::default())
        }
    }

    fn invalid(message: &str) -> ValidationOutcome {
        ValidationOutcome::Invalid {
            message: message.to_string(),
            details: json!({}),
        }
    }

    #[tokio::test]
    async fn date_templates_are_expanded_before_validation() {
        let service = ScriptedService::new([]);
        let provider = Arc::new(
            MockProvider::new().with_replies([MockReply::query(
                "SELECT name WHERE createTime >= '{{DATE_MINUS_30_DAYS}}'",
            )]),
        );
        let descriptor = ProviderDescriptor::new(provider);
        let question = Question::at(
            "recent files",
            chrono::DateTime::parse_from_rfc3339("2025-03-31T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        );

        let result = RetryController::new(service.clone(), QueryGenerator::default())
            .drive(
                &question,
                &descriptor,
                &ProgressReporter::new(MAX_RETRIES),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.query, "SELECT name WHERE createTime >= '2025-03-01'");
        assert_eq!(service.seen.lock().unwrap()[0], result.query);
    }

    #[tokio::test]
    async fn generation_error_consumes_an_attempt() {
        let service = ScriptedService::new([]);
        let provider = Arc::new(MockProvider::new().with_replies([
            MockReply::Error(crate::error::ProviderError::Refused("policy".to_string())),
            MockReply::query("SELECT name"),
        ]));
        let descriptor = ProviderDescriptor::new(provider.clone());

        let result = RetryController::new(service.clone(), QueryGenerator::default())
            .drive(
                &Question::new("names"),
                &descriptor,
                &ProgressReporter::new(MAX_RETRIES),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.history.len(), 1);
        assert!(result.history[0].query.is_empty());
        assert!(result.history[0].error.contains("policy"));
        assert_eq!(service.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_as_failed_attempt() {
        let service = ScriptedService::new([ValidationOutcome::TransportFailure {
            reason: "connection refused".to_string(),
        }]);
        let provider = Arc::new(MockProvider::new());
        let descriptor = ProviderDescriptor::new(provider.clone());

        let result = RetryController::new(service, QueryGenerator::default())
            .drive(
                &Question::new("largest files"),
                &descriptor,
                &ProgressReporter::new(MAX_RETRIES),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert!(result.history[0].error.contains("connection refused"));
        let feedback = provider.feedback_log();
        assert_eq!(feedback[1].as_ref().unwrap().error_details["kind"], "transport");
    }

    #[tokio::test]
    async fn respects_custom_budget() {
        let service = ScriptedService::new([invalid("a"), invalid("b"), invalid("c")]);
        let descriptor = ProviderDescriptor::new(Arc::new(MockProvider::new()));

        let err = RetryController::new(service, QueryGenerator::default())
            .with_max_retries(2)
            .drive(
                &Question::new("q"),
                &descriptor,
                &ProgressReporter::new(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 2);
        assert_eq!(err.to_string(), "Attempt 2 of 2: b");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_generation() {
        let service = ScriptedService::new([]);
        let provider = Arc::new(MockProvider::new());
        let descriptor = ProviderDescriptor::new(provider.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = RetryController::new(service, QueryGenerator::default())
            .drive(
                &Question::new("q"),
                &descriptor,
                &ProgressReporter::new(MAX_RETRIES),
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::Cancelled);
        assert_eq!(provider.call_count(), 0);
    }
}
