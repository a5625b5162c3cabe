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

use aql_engine::{Fingerprint, ProviderKind, ProviderOptions, QueryCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fingerprint(question: &str) -> Fingerprint {
    Fingerprint::for_question(
        question,
        ProviderKind::Ollama,
        &ProviderOptions {
            model: "tinyllama".to_string(),
            temperature: 0.1,
        },
    )
}

#[tokio::test]
async fn second_lookup_does_not_recompute() {
    let cache: QueryCache<String> = QueryCache::new(Duration::from_secs(60), 100);
    let computes = AtomicUsize::new(0);
    let counter = &computes;

    for _ in 0..2 {
        let entry = cache
            .get_or_compute(fingerprint("largest files"), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("SELECT name".to_string())
            })
            .await
            .unwrap();
        assert_eq!(entry.value, "SELECT name");
    }

    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_computation() {
    let cache: QueryCache<String> = QueryCache::new(Duration::from_secs(60), 100);
    let computes = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let computes = computes.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(fingerprint("Largest   FILES"), || async move {
                    computes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, String>("SELECT name ORDER BY \"size\" DESC".to_string())
                })
                .await
                .unwrap()
        }));
    }

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(values.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn expired_entries_are_recomputed() {
    let cache: QueryCache<u32> = QueryCache::new(Duration::from_millis(100), 100);
    let computes = AtomicUsize::new(0);
    let counter = &computes;
    let compute = || async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst) as u32) };

    let first = cache.get_or_compute(fingerprint("q"), compute).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = cache.get_or_compute(fingerprint("q"), compute).await.unwrap();

    assert_eq!(first.value, 0);
    assert_eq!(second.value, 1);
    assert!(second.cached_at > first.cached_at);
}

#[tokio::test]
async fn invalidate_forces_recompute() {
    let cache: QueryCache<u32> = QueryCache::new(Duration::from_secs(60), 100);
    let fp = Fingerprint::for_query("SELECT name");

    cache
        .get_or_compute(fp.clone(), || async { Ok::<_, String>(1) })
        .await
        .unwrap();
    cache.invalidate(&fp).await;
    let entry = cache
        .get_or_compute(fp.clone(), || async { Ok::<_, String>(2) })
        .await
        .unwrap();

    assert_eq!(entry.value, 2);
}
