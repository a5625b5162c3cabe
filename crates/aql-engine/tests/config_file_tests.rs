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

use aql_engine::{AssistantConfig, ConfigError, ProviderKind, ProviderPreference};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn loads_full_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[service]
server = "aparavi.internal:9452"
username = "svc"
password = "secret"
row_limit = 500

[llm]
provider = "claude"
generation_timeout_secs = 45

[llm.ollama]
base_url = "http://gpu-box:11434"
model = "llama3"

[retry]
max_retries = 3

[cache]
enabled = false
"#
    )
    .unwrap();

    let config = AssistantConfig::load(file.path()).unwrap();
    assert_eq!(
        config.service.query_url(),
        "http://aparavi.internal:9452/server/api/v3/database/query"
    );
    assert_eq!(config.service.row_limit, 500);
    assert_eq!(config.service.validate_timeout_secs, 10);
    assert_eq!(config.retry.max_retries, 3);
    assert!(!config.cache.enabled);
    assert_eq!(
        config.preference().unwrap(),
        ProviderPreference::Named(ProviderKind::Claude)
    );

    let ollama = config.provider_settings(ProviderKind::Ollama);
    assert_eq!(ollama.model, "llama3");
    assert_eq!(ollama.base_url, "http://gpu-box:11434");
    assert_eq!(config.provider_settings(ProviderKind::OpenAI).model, "gpt-3.5-turbo");
}

#[test]
fn empty_file_yields_defaults() {
    let file = NamedTempFile::new().unwrap();
    let config = AssistantConfig::load(file.path()).unwrap();
    assert_eq!(config, AssistantConfig::default());
    assert_eq!(config.preference().unwrap(), ProviderPreference::Auto);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = AssistantConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[service\nserver = ").unwrap();
    let err = AssistantConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}
