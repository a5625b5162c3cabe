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

use llm_contracts::{ProviderKind, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::provider::ProviderPreference;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub service: ServiceConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: String,
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub validate_timeout_secs: u64,
    pub execute_timeout_secs: u64,
    pub row_limit: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            endpoint: "/server/api/v3/database/query".to_string(),
            username: "root".to_string(),
            password: "root".to_string(),
            validate_timeout_secs: 10,
            execute_timeout_secs: 30,
            row_limit: 25_000,
        }
    }
}

impl ServiceConfig {
    pub fn query_url(&self) -> String {
        let server = self.server.trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            format!("{server}{}", self.endpoint)
        } else {
            format!("http://{server}{}", self.endpoint)
        }
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub api_version: Option<String>,
}

impl ProviderSection {
    fn resolve(&self, kind: ProviderKind) -> ProviderSettings {
        let mut settings = ProviderSettings::defaults_for(kind);
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            settings.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        if self.api_version.is_some() {
            settings.api_version = self.api_version.clone();
        }
        settings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub generation_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub enable_mock: bool,
    pub openai: ProviderSection,
    pub claude: ProviderSection,
    pub ollama: ProviderSection,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            generation_timeout_secs: 60,
            probe_timeout_secs: 5,
            enable_mock: false,
            openai: ProviderSection::default(),
            claude: ProviderSection::default(),
            ollama: ProviderSection::default(),
        }
    }
}

impl LlmConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub generation_ttl_secs: u64,
    pub result_ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generation_ttl_secs: 3600,
            result_ttl_secs: 600,
            max_entries: 1000,
        }
    }
}

impl AssistantConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AssistantConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded assistant configuration");
        Ok(config)
    }

    /// File (if any), then `.env`, then process environment.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("AQL_SERVER") {
            self.service.server = server;
        }
        if let Some(endpoint) = lookup("AQL_ENDPOINT") {
            self.service.endpoint = endpoint;
        }
        if let Some(username) = lookup("AQL_USERNAME") {
            self.service.username = username;
        }
        if let Some(password) = lookup("AQL_PASSWORD") {
            self.service.password = password;
        }
        if let Some(provider) = lookup("AQL_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(max_retries) = lookup("AQL_MAX_RETRIES") {
            self.retry.max_retries = max_retries.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("AQL_MAX_RETRIES is not a number: {max_retries}"))
            })?;
        }
        debug!(server = %self.service.server, provider = %self.llm.provider, "Applied environment overrides");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.service.validate_timeout_secs == 0 || self.service.execute_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service timeouts must be greater than zero".to_string(),
            ));
        }
        if self.llm.generation_timeout_secs == 0 || self.llm.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm timeouts must be greater than zero".to_string(),
            ));
        }
        self.preference()?;
        Ok(())
    }

    pub fn preference(&self) -> Result<ProviderPreference, ConfigError> {
        self.llm
            .provider
            .parse::<ProviderPreference>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn provider_settings(&self, kind: ProviderKind) -> ProviderSettings {
        match kind {
            ProviderKind::OpenAI => self.llm.openai.resolve(kind),
            ProviderKind::Claude => self.llm.claude.resolve(kind),
            ProviderKind::Ollama => self.llm.ollama.resolve(kind),
            ProviderKind::Mock => ProviderSettings::defaults_for(kind),
        }
    }
}
