// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stoppable periodic worker

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs a body repeatedly with a sleep between rounds, until stopped.
///
/// The stop flag is honored both between rounds and during the sleep, so a
/// stop never waits a full period.
pub struct PeriodicWorker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicWorker {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut body: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                if child.is_cancelled() {
                    break;
                }
                body().await;
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            tracing::debug!(worker = name, "periodic worker stopped");
        });
        Self { token, handle }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop and join within the budget; returns the unused remainder.
    pub async fn stop(self, budget: Option<Duration>) -> Option<Duration> {
        self.token.cancel();
        match budget {
            None => {
                let _ = self.handle.await;
                None
            }
            Some(limit) => {
                let started = Instant::now();
                let _ = tokio::time::timeout(limit, self.handle).await;
                Some(limit.saturating_sub(started.elapsed()))
            }
        }
    }
}

#[cfg(test)]
#[path = "periodic_tests.rs"]
mod tests;
