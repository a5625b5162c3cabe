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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{Fingerprint, QueryCache};
use crate::config::AssistantConfig;
use crate::credentials::CredentialStore;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::generator::QueryGenerator;
use crate::logging::{log_query_execution, log_query_request};
use crate::progress::ProgressReporter;
use crate::provider::{ProviderPreference, ProviderRegistry};
use crate::retry::{report_outcome, RetryController};
use crate::types::{GeneratedQuery, Question, QueryRows};
use crate::validator::{ConnectionStatus, DataServiceClient, QueryService, ValidationOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskOptions {
    /// Overrides the configured provider preference.
    pub preference: Option<ProviderPreference>,
    pub use_cache: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            preference: None,
            use_cache: true,
        }
    }
}

/// Entry point for hosts: question in, validated query out.
pub struct QueryAssistant {
    config: AssistantConfig,
    registry: ProviderRegistry,
    service: Arc<dyn QueryService>,
    controller: RetryController,
    generations: QueryCache<GeneratedQuery>,
    results: QueryCache<QueryRows>,
    default_preference: ProviderPreference,
}

impl QueryAssistant {
    pub fn new(
        config: AssistantConfig,
        registry: ProviderRegistry,
        service: Arc<dyn QueryService>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let default_preference = config.preference()?;
        let controller = RetryController::new(
            service.clone(),
            QueryGenerator::new(config.llm.generation_timeout()),
        )
        .with_max_retries(config.retry.max_retries);
        let generations = QueryCache::new(
            Duration::from_secs(config.cache.generation_ttl_secs),
            config.cache.max_entries,
        );
        let results = QueryCache::new(
            Duration::from_secs(config.cache.result_ttl_secs),
            config.cache.max_entries,
        );

        info!(
            providers = registry.len(),
            max_retries = controller.max_retries(),
            preference = %default_preference,
            "Query assistant ready"
        );
        Ok(Self {
            config,
            registry,
            service,
            controller,
            generations,
            results,
            default_preference,
        })
    }

    /// Builds the HTTP-backed providers and query service from configuration.
    pub fn from_config(
        config: AssistantConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ConfigError> {
        let registry = ProviderRegistry::from_config(&config, credentials);
        let service = DataServiceClient::new(&config.service)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Self::new(config, registry, Arc::new(service))
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn max_retries(&self) -> u32 {
        self.controller.max_retries()
    }

    /// A reporter sized for this assistant's retry budget.
    pub fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.controller.max_retries())
    }

    pub async fn ask(
        &self,
        question: &Question,
        options: &AskOptions,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> EngineResult<GeneratedQuery> {
        progress.understanding();
        let result = self.ask_inner(question, options, progress, cancel).await;
        report_outcome(progress, &result);
        result
    }

    /// Selects a provider and runs the loop, through the generation cache when enabled.
    async fn ask_inner(
        &self,
        question: &Question,
        options: &AskOptions,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> EngineResult<GeneratedQuery> {
        let request_id = Uuid::new_v4().to_string();
        let preference = options.preference.unwrap_or(self.default_preference);
        let descriptor = self.registry.select_provider(&preference).await?;
        log_query_request(&request_id, question.text(), descriptor.kind);

        if !options.use_cache || !self.config.cache.enabled {
            return self
                .controller
                .drive(question, &descriptor, progress, cancel)
                .await;
        }

        let fingerprint = Fingerprint::for_question(
            question.text(),
            descriptor.kind,
            &descriptor.provider.options(),
        );
        let computed = AtomicBool::new(false);
        let computed_ref = &computed;
        let descriptor_ref = &descriptor;
        loop {
            let outcome = self
                .generations
                .get_or_compute(fingerprint.clone(), || async move {
                    computed_ref.store(true, Ordering::SeqCst);
                    self.controller
                        .drive(question, descriptor_ref, progress, cancel)
                        .await
                })
                .await;

            match outcome {
                Ok(entry) => {
                    let mut generated = entry.value;
                    generated.cached = !computed.load(Ordering::SeqCst);
                    if generated.cached {
                        debug!(request_id = %request_id, "Served query from generation cache");
                    }
                    return Ok(generated);
                }
                // The computing caller was cancelled and its entry dropped; try again.
                Err(EngineError::Cancelled) if !cancel.is_cancelled() => {
                    debug!(
                        request_id = %request_id,
                        fingerprint = %fingerprint,
                        "Shared generation abandoned, retrying through the cache"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn validate(&self, query: &str) -> ValidationOutcome {
        self.service.validate(query).await
    }

    pub async fn execute(&self, query: &str, use_cache: bool) -> EngineResult<QueryRows> {
        let started = Instant::now();
        if !use_cache || !self.config.cache.enabled {
            let rows = self.service.execute(query).await?;
            log_query_execution(query, rows.len(), rows.execution_time_ms, false);
            return Ok(rows);
        }

        let computed = AtomicBool::new(false);
        let computed_ref = &computed;
        let entry = self
            .results
            .get_or_compute(Fingerprint::for_query(query), || async move {
                computed_ref.store(true, Ordering::SeqCst);
                self.service.execute(query).await
            })
            .await?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log_query_execution(
            query,
            entry.value.len(),
            elapsed_ms,
            !computed.load(Ordering::SeqCst),
        );
        Ok(entry.value)
    }

    pub async fn test_connection(&self) -> ConnectionStatus {
        self.service.test_connection().await
    }

    pub async fn availability(&self) -> Vec<(ProviderKind, bool)> {
        self.registry.availability().await
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.generations.invalidate(fingerprint).await;
        self.results.invalidate(fingerprint).await;
    }

    pub async fn clear_caches(&self) {
        self.generations.clear().await;
        self.results.clear().await;
        info!("Cleared generation and result caches");
    }

    /// Entry counts of the generation and result caches.
    pub async fn cache_stats(&self) -> (u64, u64) {
        (
            self.generations.entry_count().await,
            self.results.entry_count().await,
        )
    }
}
