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

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use llm_contracts::ProviderKind;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::types::ProviderOptions;

/// Content hash of everything that changes a cached answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn for_question(question: &str, provider: ProviderKind, options: &ProviderOptions) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"question\0");
        hasher.update(normalize_question(question).as_bytes());
        hasher.update(b"\0");
        hasher.update(provider.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(options.model.as_bytes());
        hasher.update(b"\0");
        hasher.update(options.temperature.to_bits().to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn for_query(query: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"query\0");
        hasher.update(query.trim().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercased with whitespace runs collapsed.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub fingerprint: Fingerprint,
    pub value: V,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Single-flight cache: concurrent misses on the same fingerprint share one
/// computation, and failed computations are not stored.
pub struct QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<Fingerprint, Arc<CacheEntry<V>>>,
    ttl: Duration,
}

impl<V> Clone for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            ttl: self.ttl,
        }
    }
}

impl<V> fmt::Debug for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry<V>> {
        self.inner
            .get(fingerprint)
            .await
            .map(|entry| entry.as_ref().clone())
    }

    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: Fingerprint,
        compute: F,
    ) -> Result<CacheEntry<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or_else(|_| ChronoDuration::zero());
        let key = fingerprint.clone();
        let init = async move {
            let value = compute().await?;
            let cached_at = Utc::now();
            Ok::<_, E>(Arc::new(CacheEntry {
                fingerprint,
                value,
                cached_at,
                expires_at: cached_at + ttl,
            }))
        };

        self.inner
            .try_get_with(key, init)
            .await
            .map(|entry| entry.as_ref().clone())
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(|shared| (*shared).clone()))
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.invalidate(fingerprint).await;
    }

    pub async fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ProviderOptions {
        ProviderOptions {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.1,
        }
    }

    #[test]
    fn question_fingerprint_ignores_case_and_spacing() {
        let a = Fingerprint::for_question("Largest  PDF files", ProviderKind::OpenAI, &options());
        let b = Fingerprint::for_question(" largest pdf\tfiles ", ProviderKind::OpenAI, &options());
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_depends_on_provider_and_model() {
        let base = Fingerprint::for_question("q", ProviderKind::OpenAI, &options());
        let other_kind = Fingerprint::for_question("q", ProviderKind::Claude, &options());
        let mut changed = options();
        changed.model = "gpt-4".to_string();
        let other_model = Fingerprint::for_question("q", ProviderKind::OpenAI, &changed);
        assert_ne!(base, other_kind);
        assert_ne!(base, other_model);
        assert_ne!(base, Fingerprint::for_query("q"));
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: QueryCache<String> = QueryCache::new(Duration::from_secs(60), 10);
        let fp = Fingerprint::for_query("SELECT 1");

        let failed: Result<_, String> = cache
            .get_or_compute(fp.clone(), || async { Err("down".to_string()) })
            .await;
        assert_eq!(failed.unwrap_err(), "down");
        assert!(cache.get(&fp).await.is_none());

        let entry = cache
            .get_or_compute(fp.clone(), || async { Ok::<_, String>("rows".to_string()) })
            .await
            .unwrap();
        assert_eq!(entry.value, "rows");
        assert!(entry.expires_at > entry.cached_at);
        assert_eq!(cache.entry_count().await, 1);

        cache.clear().await;
        assert!(cache.get(&fp).await.is_none());
    }
}
