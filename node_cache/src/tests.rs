// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::{DepSet, NodeCache};

type Cache = NodeCache<String, String, String>;

fn deps_of(paths: &[&str]) -> Arc<DepSet> {
    let mut deps = DepSet::new();
    deps.add_paths(paths.iter().map(PathBuf::from));
    Arc::new(deps)
}

#[tokio::test]
async fn hit_does_not_recompute() {
    let cache = Cache::new();
    let runs = AtomicUsize::new(0);

    for _ in 0..2 {
        let value = cache
            .get_or_compute(&"k".to_owned(), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(("v".to_owned(), deps_of(&["a"])))
            })
            .await
            .unwrap();
        assert_eq!(value, "v");
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_callers_coalesce() {
    let cache = Arc::new(Cache::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&"k".to_owned(), || {
                        let runs = runs.clone();
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            // Hold the computation open long enough for all callers to join it.
                            sleep(Duration::from_millis(100)).await;
                            Ok(("v".to_owned(), deps_of(&["a"])))
                        }
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok("v".to_owned()));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_callers_all_receive_the_error() {
    let cache = Arc::new(Cache::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            let runs = runs.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&"k".to_owned(), || {
                        let runs = runs.clone();
                        async move {
                            runs.fetch_add(1, Ordering::SeqCst);
                            sleep(Duration::from_millis(100)).await;
                            Err("boom".to_owned())
                        }
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Err("boom".to_owned()));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn errors_are_not_cached() {
    let cache = Cache::new();
    let runs = AtomicUsize::new(0);

    let first = cache
        .get_or_compute(&"k".to_owned(), || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_owned())
        })
        .await;
    assert_eq!(first, Err("boom".to_owned()));

    let second = cache
        .get_or_compute(&"k".to_owned(), || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(("recovered".to_owned(), deps_of(&[])))
        })
        .await;
    assert_eq!(second, Ok("recovered".to_owned()));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidation_by_dependency_path() {
    let cache = Cache::new();
    let runs = AtomicUsize::new(0);
    let compute = || async {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(("v".to_owned(), deps_of(&["BUILD", "include.bzl"])))
    };

    cache.get_or_compute(&"k".to_owned(), compute).await.unwrap();

    // An unrelated path clears nothing.
    let cleared = cache.invalidate_matching(|_, deps| {
        deps.is_some_and(|d| d.contains_path(std::path::Path::new("unrelated")))
    });
    assert_eq!(cleared, 0);
    cache.get_or_compute(&"k".to_owned(), compute).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // A tracked path clears the entry.
    let cleared = cache.invalidate_matching(|_, deps| {
        deps.is_some_and(|d| d.contains_path(std::path::Path::new("include.bzl")))
    });
    assert_eq!(cleared, 1);
    cache.get_or_compute(&"k".to_owned(), compute).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn invalidation_during_computation_discards_the_stale_result() {
    let _logger = env_logger::try_init();
    let cache = Arc::new(Cache::new());
    let runs = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());

    let caller = {
        let cache = cache.clone();
        let runs = runs.clone();
        let started = started.clone();
        let release = release.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&"k".to_owned(), || {
                    let runs = runs.clone();
                    let started = started.clone();
                    let release = release.clone();
                    async move {
                        let run = runs.fetch_add(1, Ordering::SeqCst);
                        if run == 0 {
                            // First run: signal that we are in flight, then block until the
                            // invalidation below has happened.
                            started.notify_one();
                            release.notified().await;
                            Ok(("stale".to_owned(), deps_of(&["a"])))
                        } else {
                            Ok(("fresh".to_owned(), deps_of(&["a"])))
                        }
                    }
                })
                .await
        })
    };

    started.notified().await;
    let cleared = cache.invalidate_matching(|_, _| true);
    assert_eq!(cleared, 1);
    release.notify_one();

    // The first run's result must have been discarded in favor of a recomputation.
    assert_eq!(caller.await.unwrap(), Ok("fresh".to_owned()));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(cache.peek(&"k".to_owned()), Some("fresh".to_owned()));
}

#[tokio::test]
async fn canceled_computation_does_not_wedge_the_entry() {
    let cache = Arc::new(Cache::new());
    let started = Arc::new(tokio::sync::Notify::new());

    let doomed = {
        let cache = cache.clone();
        let started = started.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&"k".to_owned(), || {
                    let started = started.clone();
                    async move {
                        started.notify_one();
                        // Block until aborted.
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                })
                .await
        })
    };

    started.notified().await;
    doomed.abort();
    let _ = doomed.await;

    // A fresh caller must be able to compute, rather than waiting forever on the aborted run.
    let value = tokio::time::timeout(
        Duration::from_secs(1),
        cache.get_or_compute(&"k".to_owned(), || async {
            Ok(("fresh".to_owned(), deps_of(&[])))
        }),
    )
    .await
    .expect("The canceled run should have released the entry.");
    assert_eq!(value, Ok("fresh".to_owned()));
}

#[tokio::test]
async fn clear_drops_everything() {
    let cache = Cache::new();
    for key in ["a", "b", "c"] {
        cache
            .get_or_compute(&key.to_owned(), || async {
                Ok((key.to_uppercase(), deps_of(&[key])))
            })
            .await
            .unwrap();
    }
    assert_eq!(cache.completed_keys().len(), 3);
    assert_eq!(cache.clear(), 3);
    assert_eq!(cache.peek(&"a".to_owned()), None);
    assert_eq!(cache.len(), 0);
}
