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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Claude,
    Ollama,
    Mock,
}

impl ProviderKind {
    /// Fixed order used when the caller asks for "auto" selection.
    pub const PRIORITY: [ProviderKind; 4] = [
        ProviderKind::OpenAI,
        ProviderKind::Claude,
        ProviderKind::Ollama,
        ProviderKind::Mock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Mock => "mock",
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, ProviderKind::OpenAI | ProviderKind::Claude)
    }

    pub fn priority(&self) -> usize {
        match self {
            ProviderKind::OpenAI => 0,
            ProviderKind::Claude => 1,
            ProviderKind::Ollama => 2,
            ProviderKind::Mock => 3,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            "mock" | "dummy" => Ok(ProviderKind::Mock),
            other => Err(LLMError::Configuration(format!(
                "Unknown provider '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LLMError {
    /// True for failures worth one more attempt against the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::Network(_) | LLMError::Timeout | LLMError::RateLimit
        )
    }
}

pub type LLMResult<T> = Result<T, LLMError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_with_aliases() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!(" ollama ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert_eq!("dummy".parse::<ProviderKind>().unwrap(), ProviderKind::Mock);
        assert!("gemini".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn priority_order_matches_constant() {
        let mut kinds = vec![
            ProviderKind::Mock,
            ProviderKind::Ollama,
            ProviderKind::OpenAI,
            ProviderKind::Claude,
        ];
        kinds.sort_by_key(|k| k.priority());
        assert_eq!(kinds, ProviderKind::PRIORITY.to_vec());
    }

    #[test]
    fn serialises_lowercase() {
        let json = serde_json::to_string(&ProviderKind::OpenAI).unwrap();
        assert_eq!(json, "\"openai\"");
    }
}
