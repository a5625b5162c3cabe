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

use llm_contracts::{LLMError, ProviderKind};
use thiserror::Error;

use crate::feedback::AttemptRecord;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider call timed out")]
    Timeout,

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider refused the request: {0}")]
    Refused(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Transport-level failures get one transparent retry at the call site.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_) | ProviderError::Timeout | ProviderError::RateLimited
        )
    }
}

impl From<LLMError> for ProviderError {
    fn from(err: LLMError) -> Self {
        match err {
            LLMError::Configuration(msg) => ProviderError::NotConfigured(msg),
            LLMError::Authentication(msg) => ProviderError::NotConfigured(msg),
            LLMError::Network(msg) => ProviderError::Transport(msg),
            LLMError::Timeout => ProviderError::Timeout,
            LLMError::RateLimit => ProviderError::RateLimited,
            LLMError::Serialisation(msg) => ProviderError::Malformed(msg),
            LLMError::Provider(msg) => ProviderError::Refused(msg),
            LLMError::Internal(msg) => ProviderError::Transport(msg),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Generation failed on attempt {attempt} ({provider}): {cause}")]
pub struct GenerationError {
    pub attempt: u32,
    pub provider: ProviderKind,
    pub cause: ProviderError,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderUnavailableError {
    #[error("Requested provider '{0}' is not available")]
    Requested(ProviderKind),

    #[error("No LLM provider is available (tried: {})", join_kinds(.0))]
    TriedAll(Vec<ProviderKind>),
}

fn join_kinds(kinds: &[ProviderKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("Query service transport error: {0}")]
    Transport(String),

    #[error("Query service timed out after {0} seconds")]
    Timeout(u64),

    #[error("Query failed with status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode query service response: {0}")]
    Decode(String),

    #[error("Query service rejected the query: {0}")]
    Rejected(String),

    #[error("Query service configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    ProviderUnavailable(#[from] ProviderUnavailableError),

    #[error("Attempt {attempts} of {max_retries}: {last_error}")]
    RetryExhausted {
        last_error: String,
        attempts: u32,
        max_retries: u32,
        history: Vec<AttemptRecord>,
    },

    #[error("Request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Query rejected by the service: {0}")]
    InvalidQuery(String),
}

impl EngineError {
    pub fn attempts(&self) -> u32 {
        match self {
            EngineError::RetryExhausted { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
