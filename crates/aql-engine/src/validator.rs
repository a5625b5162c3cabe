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

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::preprocess::{apply_row_limit, preprocess_query};
use crate::types::QueryRows;
use crate::utils::truncate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    Invalid { message: String, details: Value },
    TransportFailure { reason: String },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// The remote query service. `validate` must never execute the query.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn validate(&self, query: &str) -> ValidationOutcome;

    async fn execute(&self, query: &str) -> Result<QueryRows, ServiceError>;

    /// Runs a trivial query and reports round-trip latency.
    async fn test_connection(&self) -> ConnectionStatus {
        let started = Instant::now();
        let result = self.execute("SELECT 1 AS test").await;
        let latency_ms = elapsed_ms(started);
        match result {
            Ok(_) => {
                info!(latency_ms, "Connection test successful");
                ConnectionStatus {
                    ok: true,
                    latency_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Connection test failed");
                ConnectionStatus {
                    ok: false,
                    latency_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataServiceClient {
    client: Client,
    url: String,
    username: String,
    password: String,
    validate_timeout: Duration,
    execute_timeout: Duration,
    row_limit: u32,
}

impl DataServiceClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.query_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            validate_timeout: config.validate_timeout(),
            execute_timeout: config.execute_timeout(),
            row_limit: config.row_limit,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(
        &self,
        query: &str,
        options: Value,
        timeout: Duration,
    ) -> Result<(StatusCode, String), ServiceError> {
        let options = options.to_string();
        let request = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("select", query), ("options", options.as_str())]);

        let exchange = async {
            let resp = request.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) if e.is_timeout() => Err(ServiceError::Timeout(timeout.as_secs())),
            Ok(Err(e)) => Err(ServiceError::Transport(e.to_string())),
            Err(_) => Err(ServiceError::Timeout(timeout.as_secs())),
        }
    }

    async fn validate_once(&self, query: &str) -> ValidationOutcome {
        let options = json!({"format": "csv", "stream": true, "validate": true});
        let (status, body) = match self.send(query, options, self.validate_timeout).await {
            Ok(result) => result,
            Err(e) => {
                return ValidationOutcome::TransportFailure {
                    reason: e.to_string(),
                }
            }
        };
        debug!(status = %status, body = %truncate(&body, 1000), "Validation response");

        match serde_json::from_str::<Value>(&body) {
            Ok(data) if status.is_success() && data["status"] == "OK" => ValidationOutcome::Valid,
            Ok(data) => ValidationOutcome::Invalid {
                message: data["message"]
                    .as_str()
                    .unwrap_or("Unknown validation error")
                    .to_string(),
                details: data.get("error").cloned().unwrap_or_else(|| json!({})),
            },
            Err(_) if status.is_server_error() => ValidationOutcome::TransportFailure {
                reason: format!("Query service returned {status}"),
            },
            Err(e) => ValidationOutcome::Invalid {
                message: format!("Unreadable validation response ({status}): {e}"),
                details: json!({"body": truncate(&body, 500)}),
            },
        }
    }
}

#[async_trait]
impl QueryService for DataServiceClient {
    async fn validate(&self, query: &str) -> ValidationOutcome {
        let prepared = preprocess_query(query, Utc::now());

        let mut outcome = self.validate_once(&prepared).await;
        if let ValidationOutcome::TransportFailure { reason } = &outcome {
            warn!(reason = %reason, "Validation transport failure, retrying once");
            outcome = self.validate_once(&prepared).await;
        }

        if let ValidationOutcome::Invalid { message, .. } = &outcome {
            for issue in common_issues(&prepared) {
                warn!(error = %message, issue = %issue, "Possible cause of validation failure");
            }
        }
        outcome
    }

    async fn execute(&self, query: &str) -> Result<QueryRows, ServiceError> {
        let started = Instant::now();
        let prepared = preprocess_query(&apply_row_limit(query, self.row_limit), Utc::now());
        info!(query = %prepared, "Executing query");

        let options = json!({"format": "json", "stream": true});
        let (status, body) = self.send(&prepared, options, self.execute_timeout).await?;

        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: truncate(&body, 1000),
            });
        }

        if body.trim().is_empty() {
            warn!("Received empty response from server");
            return Ok(QueryRows::from_records(Vec::new(), elapsed_ms(started)));
        }

        let data: Value =
            serde_json::from_str(&body).map_err(|e| ServiceError::Decode(e.to_string()))?;
        let records = records_from(data)?;
        Ok(QueryRows::from_records(records, elapsed_ms(started)))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn records_from(data: Value) -> Result<Vec<serde_json::Map<String, Value>>, ServiceError> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(mut object) => {
            if let Some(status) = object.get("status").and_then(|s| s.as_str()) {
                if status != "OK" {
                    let message = object
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or(status)
                        .to_string();
                    return Err(ServiceError::Rejected(message));
                }
            }
            match object.remove("data") {
                Some(Value::Array(items)) => items,
                Some(other) => vec![other],
                None => vec![Value::Object(object)],
            }
        }
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => record,
            scalar => {
                let mut record = serde_json::Map::new();
                record.insert("value".to_string(), scalar);
                record
            }
        })
        .collect())
}

/// Appends position and hints to a service error message.
pub fn format_validation_error(message: &str, details: &Value, query: &str) -> String {
    let mut formatted = message.to_string();

    let line = details.get("line").and_then(Value::as_u64);
    let column = details.get("column").and_then(Value::as_u64);
    let position = details.get("position").and_then(Value::as_u64);

    if let (Some(line), Some(column)) = (line, column) {
        formatted.push_str(&format!(" at line {line}, column {column}"));
    } else if let Some(position) = position {
        let mut current = 0u64;
        for (index, text) in query.lines().enumerate() {
            let length = text.chars().count() as u64 + 1;
            if current + length > position {
                formatted.push_str(&format!(
                    " at line {}, column {}",
                    index + 1,
                    position - current + 1
                ));
                break;
            }
            current += length;
        }
    }

    let lower = message.to_lowercase();
    if lower.contains("unexpected") && lower.contains("expecting") {
        formatted.push_str(
            "\nTip: Check for syntax errors like missing commas, parentheses, or keywords.",
        );
    }
    if lower.contains("column") || lower.contains("table") {
        formatted.push_str(
            "\nTip: Verify that all table and column names are correct and properly quoted if needed.",
        );
    }
    if lower.contains("operator") {
        formatted.push_str(
            "\nTip: Check that you're using valid operators for the data types being compared.",
        );
    }
    formatted
}

static ORDER_BY_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)ORDER\s+BY\s+(.*?)(?:\bLIMIT\b|;|$)").unwrap());
static WHERE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)\bWHERE\s+(.*?)(?:\bGROUP\s+BY\b|\bORDER\s+BY\b|\bLIMIT\b|;|$)").unwrap()
});
static FROM_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\b").unwrap());
static FROM_STORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bFROM\s+STORE\s*\(").unwrap());

/// Heuristic checks for AQL mistakes the service commonly rejects.
pub fn common_issues(query: &str) -> Vec<String> {
    let mut issues = Vec::new();

    if let Some(clause) = ORDER_BY_CLAUSE.captures(query).and_then(|c| c.get(1)) {
        let unquoted: Vec<&str> = clause
            .as_str()
            .split(',')
            .map(|col| {
                let col = col.trim();
                col.strip_suffix(" DESC")
                    .or_else(|| col.strip_suffix(" desc"))
                    .or_else(|| col.strip_suffix(" ASC"))
                    .or_else(|| col.strip_suffix(" asc"))
                    .unwrap_or(col)
                    .trim()
            })
            .filter(|col| !col.is_empty() && !col.starts_with('"'))
            .collect();
        if !unquoted.is_empty() {
            issues.push(format!(
                "ORDER BY has unquoted columns: {}",
                unquoted.join(", ")
            ));
        }
    }

    if let Some(clause) = WHERE_CLAUSE.captures(query).and_then(|c| c.get(1)) {
        let clause = clause.as_str().trim();
        let upper = clause.to_uppercase();
        if (upper.contains(" AND ") || upper.contains(" OR ")) && !clause.starts_with('(') {
            issues.push(format!(
                "Complex WHERE condition missing parentheses: {clause}"
            ));
        }
    }

    if FROM_KEYWORD.is_match(query) && !FROM_STORE.is_match(query) {
        issues.push("FROM clause used outside of STORE()".to_string());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_converted_to_line_and_column() {
        let query = "SET @@DEFAULT_COLUMNS=name;\nSELECT name FROM files";
        let formatted = format_validation_error(
            "Syntax error: unexpected FROM, expecting WHERE",
            &json!({"position": 40}),
            query,
        );
        assert!(formatted.starts_with(
            "Syntax error: unexpected FROM, expecting WHERE at line 2, column 13"
        ));
        assert!(formatted.contains("Tip: Check for syntax errors"));
    }

    #[test]
    fn explicit_line_and_column_win() {
        let formatted = format_validation_error(
            "Unknown column 'type'",
            &json!({"line": 3, "column": 9, "position": 1}),
            "",
        );
        assert!(formatted.starts_with("Unknown column 'type' at line 3, column 9"));
        assert!(formatted.contains("column names are correct"));
    }

    #[test]
    fn detects_common_issues() {
        let issues = common_issues(
            "SELECT name FROM files WHERE size > 10 AND extension = 'pdf' ORDER BY size DESC",
        );
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("ORDER BY has unquoted columns: size"));
        assert!(issues[1].starts_with("Complex WHERE condition"));

        let clean = common_issues(
            "SELECT name AS \"Name\" WHERE (size > 10) AND (extension = 'pdf') ORDER BY \"Name\" ASC",
        );
        assert!(clean.is_empty());
        assert!(common_issues("SELECT * FROM STORE('/data/')").is_empty());
    }

    #[test]
    fn records_accept_arrays_and_data_objects() {
        let rows = records_from(json!([{"name": "a"}, {"name": "b"}])).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = records_from(json!({"status": "OK", "data": [{"n": 1}]})).unwrap();
        assert_eq!(rows[0]["n"], 1);

        let err = records_from(json!({"status": "Error", "message": "bad query"})).unwrap_err();
        assert_eq!(err, ServiceError::Rejected("bad query".to_string()));
    }
}
