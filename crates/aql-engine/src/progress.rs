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
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Understanding,
    Generating,
    Validating,
    Repairing,
    Complete,
    Failed,
}

impl ProgressStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStage::Complete | ProgressStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::Understanding => "understanding",
            ProgressStage::Generating => "generating",
            ProgressStage::Validating => "validating",
            ProgressStage::Repairing => "repairing",
            ProgressStage::Complete => "complete",
            ProgressStage::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Shared between clones of one reporter.
#[derive(Default)]
struct ReporterState {
    /// Highest percent emitted so far.
    last_percent: u8,
    /// Set once `complete` or `failed` has fired.
    terminated: bool,
    /// Registered stage listeners.
    callbacks: Vec<ProgressCallback>,
    /// Channel subscribers; closed receivers are pruned on emit.
    senders: Vec<mpsc::UnboundedSender<ProgressEvent>>,
}

/// Emits one request's stage transitions. Percentages never go backwards and
/// nothing is emitted after `complete` or `failed`.
#[derive(Clone)]
pub struct ProgressReporter {
    /// Denominator for the repairing percentage.
    max_retries: u32,
    /// Listener list plus monotonic bookkeeping.
    state: Arc<Mutex<ReporterState>>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("max_retries", &self.max_retries)
            .field("last_percent", &self.last_percent())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            state: Arc::new(Mutex::new(ReporterState::default())),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn on_stage_change(&self, callback: ProgressCallback) {
        if let Ok(mut state) = self.state.lock() {
            state.callbacks.push(callback);
        }
    }

    pub fn channel(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.state.lock() {
            state.senders.push(tx);
        }
        rx
    }

    pub fn last_percent(&self) -> u8 {
        self.state.lock().map(|s| s.last_percent).unwrap_or(0)
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().map(|s| s.terminated).unwrap_or(false)
    }

    pub fn understanding(&self) {
        self.emit(
            ProgressStage::Understanding,
            "Understanding your question".to_string(),
            10,
            None,
            None,
        );
    }

    pub fn generating(&self, attempt: u32) {
        let message = if attempt <= 1 {
            "Generating AQL query".to_string()
        } else {
            format!("Generating revised query (attempt {attempt})")
        };
        self.emit(ProgressStage::Generating, message, 30, Some(attempt), None);
    }

    pub fn validating(&self, attempt: u32) {
        self.emit(
            ProgressStage::Validating,
            format!("Validating query (attempt {attempt})"),
            60,
            Some(attempt),
            None,
        );
    }

    pub fn repairing(&self, attempt: u32, error: &str) {
        let percent = 60 + 30 * attempt.min(self.max_retries) / self.max_retries;
        self.emit(
            ProgressStage::Repairing,
            format!(
                "Attempt {attempt} of {} failed, fixing the query",
                self.max_retries
            ),
            u8::try_from(percent).unwrap_or(90),
            Some(attempt),
            Some(error.to_string()),
        );
    }

    pub fn complete(&self, attempts: u32) {
        self.emit(
            ProgressStage::Complete,
            "Query generated successfully".to_string(),
            100,
            Some(attempts),
            None,
        );
    }

    pub fn failed(&self, error: &str, attempts: u32) {
        let message = if attempts > 0 {
            format!("Attempt {attempts} of {}: {error}", self.max_retries)
        } else {
            error.to_string()
        };
        self.emit(
            ProgressStage::Failed,
            message,
            100,
            (attempts > 0).then_some(attempts),
            Some(error.to_string()),
        );
    }

    /// Clamps the percent and fans the event out.
    fn emit(
        &self,
        stage: ProgressStage,
        message: String,
        percent: u8,
        attempt: Option<u32>,
        error: Option<String>,
    ) {
        let (event, callbacks) = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.terminated {
                warn!(stage = %stage, "Ignoring progress event after terminal stage");
                return;
            }
            let percent = percent.max(state.last_percent);
            state.last_percent = percent;
            state.terminated = stage.is_terminal();

            let event = ProgressEvent {
                stage,
                message,
                percent,
                attempt,
                error,
            };
            state.senders.retain(|tx| tx.send(event.clone()).is_ok());
            (event, state.callbacks.clone())
        };

        debug!(stage = %event.stage, percent = event.percent, "Progress");
        for callback in callbacks {
            callback(&event);
        }
    }
}
