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
use llm_contracts::ProviderKind;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::LlmProvider;
use crate::error::ProviderError;
use crate::feedback::FeedbackRecord;
use crate::types::{ProviderOptions, Question, Translation};

#[derive(Debug, Clone)]
pub enum MockReply {
    Translation(Translation),
    Raw(String),
    Error(ProviderError),
}

impl MockReply {
    pub fn query(query: impl Into<String>) -> Self {
        MockReply::Translation(Translation {
            understanding: None,
            query: query.into(),
            explanation: "Mock provider response".to_string(),
        })
    }
}

/// Scripted provider. Replies are consumed in order, then the fallback repeats.
pub struct MockProvider {
    kind: ProviderKind,
    available: AtomicBool,
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    feedback_log: Mutex<Vec<Option<FeedbackRecord>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            kind: ProviderKind::Mock,
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: MockReply::Translation(Translation {
                understanding: Some("List the largest files".to_string()),
                query: "SET @@DEFAULT_COLUMNS=parentPath,name,size; SELECT name AS \"File Name\", size AS \"Size\" ORDER BY \"Size\" DESC".to_string(),
                explanation: "Mock provider response".to_string(),
            }),
            delay: None,
            calls: AtomicUsize::new(0),
            feedback_log: Mutex::new(Vec::new()),
        }
    }

    /// Lets a mock stand in for another backend in selection tests.
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(replies);
        }
        self
    }

    pub fn with_fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn feedback_log(&self) -> Vec<Option<FeedbackRecord>> {
        self.feedback_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn options(&self) -> ProviderOptions {
        ProviderOptions {
            model: "mock".to_string(),
            temperature: 0.0,
        }
    }

    async fn translate(
        &self,
        question: &Question,
        feedback: Option<&FeedbackRecord>,
    ) -> Result<Translation, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut log) = self.feedback_log.lock() {
            log.push(feedback.cloned());
        }
        debug!(
            call,
            question = question.text(),
            repair = feedback.is_some(),
            "Mock provider translating"
        );

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable(format!(
                "{} is not reachable",
                self.kind
            )));
        }

        match self.next_reply() {
            MockReply::Translation(translation) => Ok(translation),
            MockReply::Raw(raw) => self.format_response(&raw),
            MockReply::Error(err) => Err(err),
        }
    }

    async fn check_availability(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
