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

use crate::types::ProviderKind;

/// Per-backend model settings shared by the HTTP clients and the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_version: Option<String>,
}

impl ProviderSettings {
    pub fn defaults_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAI => Self {
                model: "gpt-3.5-turbo".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                max_tokens: 4096,
                temperature: 0.1,
                api_version: None,
            },
            ProviderKind::Claude => Self {
                model: "claude-3-opus-20240229".to_string(),
                base_url: "https://api.anthropic.com/v1".to_string(),
                max_tokens: 4096,
                temperature: 0.1,
                api_version: Some("2023-06-01".to_string()),
            },
            ProviderKind::Ollama => Self {
                model: "tinyllama".to_string(),
                base_url: "http://localhost:11434".to_string(),
                max_tokens: 4096,
                temperature: 0.1,
                api_version: None,
            },
            ProviderKind::Mock => Self {
                model: "mock".to_string(),
                base_url: String::new(),
                max_tokens: 0,
                temperature: 0.0,
                api_version: None,
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::defaults_for(ProviderKind::OpenAI)
    }
}
