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

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const DATE_VARIABLES: [(&str, i64); 10] = [
    ("{{TODAY}}", 0),
    ("{{DATE_MINUS_30_DAYS}}", 30),
    ("{{DATE_MINUS_90_DAYS}}", 90),
    ("{{DATE_MINUS_6_MONTHS}}", 182),
    ("{{DATE_MINUS_1_YEAR}}", 365),
    ("{{DATE_MINUS_2_YEARS}}", 730),
    ("{{DATE_MINUS_3_YEARS}}", 1095),
    ("{{DATE_MINUS_5_YEARS}}", 1825),
    ("{{DATE_MINUS_7_YEARS}}", 2555),
    ("{{DATE_MINUS_10_YEARS}}", 3650),
];

static TEMPLATE_VARIABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{.*?\}\}").unwrap());

/// Replaces date template variables relative to `reference`.
pub fn preprocess_query(query: &str, reference: DateTime<Utc>) -> String {
    if !query.contains("{{") {
        return query.to_string();
    }

    let mut processed = query.to_string();
    for (name, days_back) in DATE_VARIABLES {
        if processed.contains(name) {
            let date = (reference - Duration::days(days_back))
                .format("%Y-%m-%d")
                .to_string();
            processed = processed.replace(name, &date);
        }
    }

    let leftover = unreplaced_variables(&processed);
    if leftover.is_empty() {
        debug!("Substituted date template variables");
    } else {
        warn!(
            variables = %leftover.join(", "),
            "Unreplaced variables in query"
        );
    }
    processed
}

pub fn unreplaced_variables(query: &str) -> Vec<String> {
    TEMPLATE_VARIABLE
        .find_iter(query)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Appends `LIMIT n` to the last non-empty statement unless a LIMIT is present.
pub fn apply_row_limit(query: &str, row_limit: u32) -> String {
    if query.to_uppercase().contains("LIMIT") {
        return query.to_string();
    }

    if !query.contains(';') {
        return format!("{query} LIMIT {row_limit}");
    }

    let mut statements: Vec<String> = query.split(';').map(|s| s.to_string()).collect();
    if let Some(last) = statements.iter_mut().rev().find(|s| !s.trim().is_empty()) {
        last.push_str(&format!(" LIMIT {row_limit}"));
    }
    statements.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap()
    }

    #[test]
    fn substitutes_known_variables() {
        let query = "SELECT name WHERE (createTime >= '{{DATE_MINUS_1_YEAR}}') AND (createTime <= '{{TODAY}}')";
        let processed = preprocess_query(query, reference());
        assert_eq!(
            processed,
            "SELECT name WHERE (createTime >= '2024-03-12') AND (createTime <= '2025-03-12')"
        );
    }

    #[test]
    fn six_months_is_182_days() {
        let processed = preprocess_query("{{DATE_MINUS_6_MONTHS}}", reference());
        assert_eq!(processed, "2024-09-11");
    }

    #[test]
    fn unknown_variables_are_left_in_place() {
        let processed = preprocess_query("WHERE x = '{{LAST_WEEK}}'", reference());
        assert_eq!(processed, "WHERE x = '{{LAST_WEEK}}'");
        assert_eq!(unreplaced_variables(&processed), vec!["{{LAST_WEEK}}"]);
    }

    #[test]
    fn row_limit_goes_on_last_statement() {
        assert_eq!(apply_row_limit("SELECT name", 25000), "SELECT name LIMIT 25000");
        assert_eq!(
            apply_row_limit("SET @@DEFAULT_COLUMNS=name; SELECT name;", 10),
            "SET @@DEFAULT_COLUMNS=name; SELECT name LIMIT 10;"
        );
        assert_eq!(
            apply_row_limit("SELECT name limit 5", 10),
            "SELECT name limit 5"
        );
    }
}
