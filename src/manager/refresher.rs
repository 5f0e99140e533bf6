/*!
 * Background Block Key Refresher
 *
 * The refresher polls the key source on a fixed period and feeds every key
 * set it gets into the secret store. It runs as a tokio task watched by a
 * supervisor task that turns unexpected failures into a stopped run state.
 */

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::error::{KeyError, KeyResult};
use crate::keys::{KeySource, SecretStore};
use crate::manager::run_state::Lifecycle;

/// Point-in-time view of the refresher's health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshHealthSnapshot {
    /// When key material was last fetched and stored successfully
    pub last_success: Option<DateTime<Utc>>,
    pub successful_refreshes: u64,
    /// Failed polls since the last successful one
    pub consecutive_failures: u32,
    /// Whether the refresher died from an unexpected failure
    pub failed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RefreshHealth {
    last_success: Mutex<Option<DateTime<Utc>>>,
    successes: AtomicU64,
    consecutive_failures: AtomicU32,
    failed: AtomicBool,
}

impl RefreshHealth {
    fn record_success(&self, at: DateTime<Utc>) {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> RefreshHealthSnapshot {
        RefreshHealthSnapshot {
            last_success: *self.last_success.lock().unwrap_or_else(PoisonError::into_inner),
            successful_refreshes: self.successes.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

/// Periodically updates block keys from the key source
pub(crate) struct KeyRefresher<S: SecretStore> {
    scope: String,
    source: Arc<dyn KeySource>,
    store: Arc<S>,
    lifecycle: Arc<Lifecycle>,
    health: Arc<RefreshHealth>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl<S: SecretStore> KeyRefresher<S> {
    pub(crate) fn new(
        scope: String,
        source: Arc<dyn KeySource>,
        store: Arc<S>,
        lifecycle: Arc<Lifecycle>,
        health: Arc<RefreshHealth>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        log::info!("Update block keys for {} every {:?}", scope, period);
        Self {
            scope,
            source,
            store,
            lifecycle,
            health,
            clock,
            period,
        }
    }

    /// Start the refresh loop on `handle` under a supervisor task.
    ///
    /// The returned handle belongs to the supervisor, which finishes once the
    /// loop has ended and its outcome has been recorded.
    pub(crate) fn spawn(self, handle: &Handle) -> JoinHandle<()> {
        let scope = self.scope.clone();
        let lifecycle = self.lifecycle.clone();
        let health = self.health.clone();
        let worker_handle = handle.clone();

        handle.spawn(async move {
            let worker = worker_handle.spawn(self.run());
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::error!("Exception in block key refresher for {}: {}", scope, e);
                    health.mark_failed();
                    lifecycle.stop();
                }
                Err(e) if e.is_panic() => {
                    log::error!("Block key refresher for {} panicked", scope);
                    health.mark_failed();
                    lifecycle.stop();
                }
                Err(e) => {
                    log::debug!("Block key refresher for {} was aborted: {}", scope, e);
                }
            }
        })
    }

    async fn run(self) -> KeyResult<()> {
        let cancel = self.lifecycle.cancellation_token();

        while self.lifecycle.is_running() {
            // A fetch still in flight at shutdown is dropped, never stored.
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Block key refresher for {} cancelled during fetch", self.scope);
                    break;
                }
                fetched = self.source.fetch_keys() => fetched,
            };
            match fetched {
                Ok(keys) => match self.store.add_keys(keys) {
                    Ok(()) => self.health.record_success(self.clock.now()),
                    Err(e) if e.is_transient() => self.record_failure(&e),
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_transient() => self.record_failure(&e),
                Err(e) => return Err(e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("Block key refresher for {} cancelled", self.scope);
                    break;
                }
                _ = tokio::time::sleep(self.period) => {}
            }
        }
        Ok(())
    }

    fn record_failure(&self, error: &KeyError) {
        log::error!(
            "Failed to set block keys for {} from {}: {}",
            self.scope,
            self.source.name(),
            error
        );
        self.health.record_failure();
    }
}
