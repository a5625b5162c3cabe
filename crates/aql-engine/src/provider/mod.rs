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

mod chat;
mod mock;
mod registry;

use async_trait::async_trait;
use llm_contracts::ProviderKind;

use crate::error::ProviderError;
use crate::feedback::FeedbackRecord;
use crate::types::{ProviderOptions, Question, Translation};
use crate::utils::parse_translation;

pub use chat::ChatProvider;
pub use mock::{MockProvider, MockReply};
pub use registry::{
    ProviderDescriptor, ProviderPreference, ProviderRegistry, UnknownProviderError,
};

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn options(&self) -> ProviderOptions;

    async fn translate(
        &self,
        question: &Question,
        feedback: Option<&FeedbackRecord>,
    ) -> Result<Translation, ProviderError>;

    async fn check_availability(&self) -> bool;

    fn format_response(&self, raw: &str) -> Result<Translation, ProviderError> {
        parse_translation(raw)
    }
}
