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

//! Natural-language to AQL translation with remote validation and a bounded
//! feedback-driven repair loop.

pub mod assistant;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod logging;
pub mod preprocess;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod types;
pub mod utils;
pub mod validator;

pub use assistant::{AskOptions, QueryAssistant};
pub use cache::{normalize_question, CacheEntry, Fingerprint, QueryCache};
pub use config::{AssistantConfig, CacheConfig, LlmConfig, RetryConfig, ServiceConfig};
pub use credentials::{CredentialStore, EnvCredentialStore, StaticCredentialStore};
pub use error::{
    ConfigError, EngineError, EngineResult, GenerationError, ProviderError,
    ProviderUnavailableError, ServiceError,
};
pub use feedback::{AttemptRecord, FeedbackAccumulator, FeedbackRecord};
pub use generator::QueryGenerator;
pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter, ProgressStage};
pub use provider::{
    ChatProvider, LlmProvider, MockProvider, MockReply, ProviderDescriptor, ProviderPreference,
    ProviderRegistry, UnknownProviderError,
};
pub use retry::{RetryController, RetryState, MAX_RETRIES};
pub use types::{GeneratedQuery, GenerationAttempt, ProviderOptions, Question, QueryRows, Translation};
pub use validator::{
    common_issues, format_validation_error, ConnectionStatus, DataServiceClient, QueryService,
    ValidationOutcome,
};

pub use llm_contracts::ProviderKind;
pub use tokio_util::sync::CancellationToken;
