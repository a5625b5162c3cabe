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

use chrono::{DateTime, Utc};
use llm_contracts::Message;

use crate::feedback::FeedbackRecord;
use crate::types::Question;

pub const SYSTEM_PROMPT: &str = r#"You generate Aparavi Query Language (AQL) queries from natural language questions.

AQL is SQL-92 based and runs independently on every aggregator. It has hard limits:
- no joins and no subqueries
- no FROM clause, except `SELECT * FROM STORE('/path/')` to scope a query
- no COUNT(DISTINCT ...), DATEADD, DATE_SUB or INTERVAL

Structure rules:
1. Start every query with `SET @@DEFAULT_COLUMNS=` listing only physical columns
   (parentPath, name, size, createTime, modifyTime, accessTime, objectId, instanceId,
   extension, category, classification, classifications, osOwner, osPermission,
   dupCount, dupKey, metadata, docCreator, docCreateTime, docModifier, docModifyTime,
   confidence, storeSize, storeTime, userTag, isContainer). Never list aliases,
   function calls or aggregates there.
2. Alias columns with double quotes: `size AS "Size"`. Single quotes are for literals.
3. GROUP BY uses the original column names; ORDER BY and HAVING use the quoted aliases.
4. Wrap every WHERE condition in parentheses: `WHERE (a = 1) AND (b = 2)`.
5. Dates are literals in 'YYYY-MM-DD' form with both bounds when a range is requested.
   Use the current date given with the question to compute relative ranges.
   Never emit template variables.
6. Extensions have no leading dot: `extension = 'pdf'`.
7. Directories are `isContainer = true`; there is no `type` column.
8. When searching classifications, check both `classification` and `classifications`.

Respond with one JSON object and nothing else:
{
  "understanding": "short interpretation of the request",
  "query": "SET @@DEFAULT_COLUMNS=...; SELECT ...",
  "explanation": "what each part of the query does"
}"#;

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You are an expert in Aparavi Query Language (AQL).
A query you wrote was rejected by the AQL validator. Fix it with the smallest change
that addresses the error.

Keep these AQL rules in mind:
1. Extract date parts with SUBSTRING(createTime, 1, 4) for the year, (6, 2) for the month
   and (9, 2) for the day.
2. GROUP BY and ORDER BY reference quoted aliases separated by commas: `GROUP BY "Year", "Month"`.
3. Wrap WHERE conditions in parentheses: `WHERE (condition1) OR (condition2)`.
4. Compare periods with CASE WHEN inside aggregates.
5. Match array columns such as `classifications` with LIKE and wildcards.
6. Only reference columns that exist.
7. Do not repeat a query that already failed.

Respond with one JSON object and nothing else:
{
  "understanding": "what went wrong",
  "query": "the corrected query",
  "explanation": "what was changed"
}"#;

pub fn question_with_timestamp(question: &Question) -> String {
    format!(
        "{}\n\nThe current date and time is: {}",
        question.text(),
        format_timestamp(question.reference_time())
    )
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn build_repair_prompt(question: &Question, feedback: &FeedbackRecord) -> String {
    let details = serde_json::to_string_pretty(&feedback.error_details)
        .unwrap_or_else(|_| feedback.error_details.to_string());

    let mut prompt = format!(
        "ORIGINAL QUESTION: {}\n\nINVALID QUERY:\n{}\n\nERROR MESSAGE:\n{}\n\nERROR DETAILS:\n{}",
        question_with_timestamp(question),
        feedback.original_query,
        feedback.error,
        details
    );

    let expecting = feedback.expecting_tokens();
    if !expecting.is_empty() {
        prompt.push_str(&format!(
            "\n\nEXPECTED TOKENS AT ERROR POSITION:\n{}",
            expecting.join(", ")
        ));
        if let Some(token) = feedback.offending_token() {
            prompt.push_str(&format!(
                "\n\nThe parser found '{token}' but expected one of the tokens above."
            ));
        }
    }

    let earlier: Vec<_> = feedback
        .previous_attempts
        .iter()
        .filter(|a| a.query != feedback.original_query)
        .collect();
    if !earlier.is_empty() {
        prompt.push_str("\n\nEARLIER FAILED ATTEMPTS:");
        for attempt in earlier {
            prompt.push_str(&format!(
                "\n- Attempt {}: {}\n  Error: {}",
                attempt.attempt_number,
                if attempt.query.is_empty() {
                    "(no query produced)"
                } else {
                    attempt.query.as_str()
                },
                attempt.error
            ));
        }
    }

    prompt.push_str("\n\nFix the query so it addresses the error.");
    prompt
}

pub fn build_messages(question: &Question, feedback: Option<&FeedbackRecord>) -> Vec<Message> {
    match feedback {
        None => vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(question_with_timestamp(question)),
        ],
        Some(feedback) => vec![
            Message::system(REPAIR_SYSTEM_PROMPT),
            Message::user(build_repair_prompt(question, feedback)),
        ],
    }
}
