// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn body_runs_repeatedly_until_stopped() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let worker = PeriodicWorker::spawn("test", Duration::from_millis(10), move || {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(worker.is_active());
    worker.stop(None).await;
    let runs = counter.load(Ordering::SeqCst);
    assert!(runs >= 2, "expected repeated runs, got {runs}");
}

#[tokio::test]
async fn stop_does_not_wait_a_full_period() {
    let worker = PeriodicWorker::spawn("slow", Duration::from_secs(60), || async {});
    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = std::time::Instant::now();
    let remaining = worker.stop(Some(Duration::from_secs(30))).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    let remaining = remaining.expect("budget in, budget out");
    assert!(remaining > Duration::from_secs(25));
}

#[tokio::test]
async fn stop_without_budget_returns_none() {
    let worker = PeriodicWorker::spawn("t", Duration::from_millis(5), || async {});
    assert!(worker.stop(None).await.is_none());
}

#[tokio::test]
async fn stopped_worker_reports_inactive() {
    let worker = PeriodicWorker::spawn("t", Duration::from_millis(5), || async {});
    let token = worker.token.clone();
    token.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!worker.is_active());
}
