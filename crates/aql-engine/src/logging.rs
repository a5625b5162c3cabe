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
use tracing::{debug, error, info, warn};

use crate::validator::ValidationOutcome;

pub fn log_query_request(request_id: &str, question: &str, provider: ProviderKind) {
    info!(
        target: "aql::audit",
        request_id = request_id,
        provider = %provider,
        question = question,
        "Query generation requested"
    );
}

pub fn log_generation_attempt(attempt: u32, provider: ProviderKind, query: &str) {
    debug!(
        target: "aql::audit",
        attempt = attempt,
        provider = %provider,
        query = query,
        "Generated candidate query"
    );
}

pub fn log_query_validation(attempt: u32, query: &str, outcome: &ValidationOutcome) {
    match outcome {
        ValidationOutcome::Valid => info!(
            target: "aql::audit",
            attempt = attempt,
            query = query,
            "Query validation succeeded"
        ),
        ValidationOutcome::Invalid { message, details } => warn!(
            target: "aql::audit",
            attempt = attempt,
            query = query,
            error = message.as_str(),
            details = %details,
            "Query validation failed"
        ),
        ValidationOutcome::TransportFailure { reason } => warn!(
            target: "aql::audit",
            attempt = attempt,
            query = query,
            reason = reason.as_str(),
            "Query validation could not reach the service"
        ),
    }
}

pub fn log_query_modification(attempt: u32, previous: &str, revised: &str) {
    info!(
        target: "aql::audit",
        attempt = attempt,
        previous = previous,
        revised = revised,
        "Query revised after feedback"
    );
}

pub fn log_retry_exhausted(attempts: u32, last_error: &str) {
    error!(
        target: "aql::audit",
        attempts = attempts,
        last_error = last_error,
        "Query generation exhausted all attempts"
    );
}

pub fn log_query_execution(query: &str, rows: usize, elapsed_ms: u64, cache_hit: bool) {
    info!(
        target: "aql::audit",
        query = query,
        rows = rows,
        elapsed_ms = elapsed_ms,
        cache_hit = cache_hit,
        "Query executed"
    );
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
