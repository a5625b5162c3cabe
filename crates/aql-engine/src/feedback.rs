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
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(rename = "attempt")]
    pub attempt_number: u32,
    pub query: String,
    pub explanation: String,
    pub error: String,
}

/// Everything the provider needs to repair its last answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub original_query: String,
    pub error: String,
    #[serde(default)]
    pub error_details: Value,
    #[serde(default)]
    pub previous_attempts: Vec<AttemptRecord>,
}

impl FeedbackRecord {
    pub fn expecting_tokens(&self) -> Vec<String> {
        self.error_details["params"]["expecting"]
            .as_array()
            .map(|tokens| {
                tokens
                    .iter()
                    .filter_map(|t| t.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn offending_token(&self) -> Option<&str> {
        self.error_details["params"]["token"]
            .as_str()
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone)]
struct FailedAttempt {
    record: AttemptRecord,
    details: Value,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackAccumulator {
    failures: Vec<FailedAttempt>,
}

impl FeedbackAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(
        &mut self,
        attempt_number: u32,
        query: impl Into<String>,
        explanation: impl Into<String>,
        error: impl Into<String>,
        details: Value,
    ) {
        self.failures.push(FailedAttempt {
            record: AttemptRecord {
                attempt_number,
                query: query.into(),
                explanation: explanation.into(),
                error: error.into(),
            },
            details,
        });
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn history(&self) -> Vec<AttemptRecord> {
        self.failures.iter().map(|f| f.record.clone()).collect()
    }

    /// Rebuilt from the whole history each time; `None` before the first failure.
    pub fn build(&self) -> Option<FeedbackRecord> {
        let latest = self.failures.last()?;
        Some(FeedbackRecord {
            original_query: latest.record.query.clone(),
            error: latest.record.error.clone(),
            error_details: latest.details.clone(),
            previous_attempts: self.history(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_accumulator_builds_nothing() {
        assert!(FeedbackAccumulator::new().build().is_none());
    }

    #[test]
    fn record_points_at_latest_failure() {
        let mut acc = FeedbackAccumulator::new();
        acc.record_failure(1, "SELECT a", "first", "bad token", json!({"position": 7}));
        acc.record_failure(2, "SELECT b", "second", "unknown column", json!({}));

        let record = acc.build().unwrap();
        assert_eq!(record.original_query, "SELECT b");
        assert_eq!(record.error, "unknown column");
        assert_eq!(record.previous_attempts.len(), 2);
        assert_eq!(record.previous_attempts[0].error, "bad token");
        assert_eq!(record.previous_attempts[1].attempt_number, 2);
    }

    #[test]
    fn wire_shape_uses_attempt_key() {
        let mut acc = FeedbackAccumulator::new();
        acc.record_failure(1, "SELECT a", "why", "boom", json!({"code": 1}));
        let value = serde_json::to_value(acc.build().unwrap()).unwrap();

        assert_eq!(value["original_query"], "SELECT a");
        assert_eq!(value["error_details"]["code"], 1);
        assert_eq!(value["previous_attempts"][0]["attempt"], 1);
        assert!(value["previous_attempts"][0].get("attempt_number").is_none());
    }

    #[test]
    fn expecting_tokens_read_from_params() {
        let record = FeedbackRecord {
            original_query: "SELECT".to_string(),
            error: "Syntax error".to_string(),
            error_details: json!({"params": {"expecting": ["WHERE", "GROUP"], "token": "FROM"}}),
            previous_attempts: vec![],
        };
        assert_eq!(record.expecting_tokens(), vec!["WHERE", "GROUP"]);
        assert_eq!(record.offending_token(), Some("FROM"));
    }
}
