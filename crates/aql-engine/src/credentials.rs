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

use llm_contracts::ProviderKind;
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of provider API keys. Looked up on every call so key rotation is observed.
pub trait CredentialStore: Send + Sync {
    fn api_key(&self, kind: ProviderKind) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    fn variables(kind: ProviderKind) -> &'static [&'static str] {
        match kind {
            ProviderKind::OpenAI => &["OPENAI_API_KEY"],
            ProviderKind::Claude => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
            ProviderKind::Ollama | ProviderKind::Mock => &[],
        }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn api_key(&self, kind: ProviderKind) -> Option<String> {
        Self::variables(kind)
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    keys: RwLock<HashMap<ProviderKind, String>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(self, kind: ProviderKind, key: impl Into<String>) -> Self {
        self.set_key(kind, key);
        self
    }

    pub fn set_key(&self, kind: ProviderKind, key: impl Into<String>) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(kind, key.into());
        }
    }

    pub fn remove_key(&self, kind: ProviderKind) {
        if let Ok(mut keys) = self.keys.write() {
            keys.remove(&kind);
        }
    }
}

impl CredentialStore for StaticCredentialStore {
    fn api_key(&self, kind: ProviderKind) -> Option<String> {
        self.keys
            .read()
            .ok()
            .and_then(|keys| keys.get(&kind).cloned())
            .filter(|key| !key.trim().is_empty())
    }
}
