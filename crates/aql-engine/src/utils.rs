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

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::Translation;

pub fn extract_json_from_text(text: &str) -> Option<Value> {
    if let Ok(json_val) = serde_json::from_str::<Value>(text.trim()) {
        debug!("Parsed entire provider output as JSON");
        return Some(json_val);
    }

    for (language, code_content) in extract_code_blocks(text) {
        if language.as_deref() == Some("json") || language.is_none() {
            if let Ok(json_val) = serde_json::from_str::<Value>(&code_content) {
                debug!("Extracted JSON from markdown code fence");
                return Some(json_val);
            }
        }
    }

    if let Some(json_obj) = find_json_delimiters(text, '{', '}') {
        if let Ok(val) = serde_json::from_str(&json_obj) {
            debug!("Extracted JSON object from surrounding text");
            return Some(val);
        }
        warn!(
            "Found JSON-like substring, but it failed to parse: {}",
            json_obj
        );
    }

    None
}

fn find_json_delimiters(text: &str, start_char: char, end_char: char) -> Option<String> {
    let mut balance = 0i32;
    let mut start_index = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' && start_index.is_some() {
            in_string = true;
        } else if ch == start_char {
            if balance == 0 {
                start_index = Some(i);
            }
            balance += 1;
        } else if ch == end_char && balance > 0 {
            balance -= 1;
            if balance == 0 {
                if let Some(start) = start_index {
                    return Some(text[start..=i].to_string());
                }
            }
        }
    }
    None
}

pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut code_blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(lang_str) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = match lang_str.trim() {
            "" => None,
            lang => Some(lang.to_ascii_lowercase()),
        };

        let mut code_content = String::new();
        for code_line in lines.by_ref() {
            if code_line.trim().starts_with("```") {
                break;
            }
            if !code_content.is_empty() {
                code_content.push('\n');
            }
            code_content.push_str(code_line);
        }
        code_blocks.push((language, code_content));
    }
    code_blocks
}

fn looks_like_query(text: &str) -> bool {
    let upper = text.trim_start().to_ascii_uppercase();
    upper.starts_with("SET ") || upper.starts_with("SELECT ") || upper.starts_with("SET@@")
}

/// Accepts a JSON answer (bare, fenced, or embedded) or a bare/fenced query.
pub fn parse_translation(raw: &str) -> Result<Translation, ProviderError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::Malformed("empty response".to_string()));
    }

    if let Some(value) = extract_json_from_text(trimmed) {
        if value.is_object() {
            return translation_from_json(&value);
        }
    }

    for (language, content) in extract_code_blocks(trimmed) {
        let is_query_block = matches!(language.as_deref(), Some("sql") | Some("aql") | None);
        if is_query_block && looks_like_query(&content) {
            return Ok(Translation {
                understanding: None,
                query: content.trim().to_string(),
                explanation: String::new(),
            });
        }
    }

    if looks_like_query(trimmed) {
        return Ok(Translation {
            understanding: None,
            query: trimmed.to_string(),
            explanation: String::new(),
        });
    }

    Err(ProviderError::Malformed(format!(
        "no query found in response: {}",
        truncate(trimmed, 200)
    )))
}

fn translation_from_json(value: &Value) -> Result<Translation, ProviderError> {
    let query = value["query"]
        .as_str()
        .map(|q| q.trim().to_string())
        .unwrap_or_default();

    if query.is_empty() {
        return Err(ProviderError::Malformed(
            "response JSON has no 'query' field".to_string(),
        ));
    }

    Ok(Translation {
        understanding: value["understanding"].as_str().map(|s| s.to_string()),
        query,
        explanation: value["explanation"].as_str().unwrap_or_default().to_string(),
    })
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
