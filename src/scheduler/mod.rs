//! Polling scheduler.
//!
//! Refreshes immediately on start, then on every tick of a fixed interval. At most
//! one refresh runs at a time: a tick or manual refresh arriving while one is
//! outstanding is dropped. Stopping cancels the timer only; a refresh that was
//! already dispatched runs to completion and its stores discard stale results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::SyncError;

/// Cadence while the user is active.
pub const FAST_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Cadence while the user is idle.
pub const SLOW_POLL_INTERVAL: Duration = Duration::from_secs(15);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One full refresh pass.
pub type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// When false only the activation refresh runs
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: FAST_POLL_INTERVAL,
        }
    }
}

/// Source of user-activity signals. Informational only; never stops polling.
pub trait ActivitySource: Send + Sync {
    fn is_active(&self) -> bool;
    fn last_activity(&self) -> Option<DateTime<Utc>>;

    fn suggested_interval(&self) -> Duration {
        if self.is_active() {
            FAST_POLL_INTERVAL
        } else {
            SLOW_POLL_INTERVAL
        }
    }
}

/// Activity flag fed by the local API.
pub struct ActivityTracker {
    active: AtomicBool,
    last_activity: Mutex<Option<DateTime<Utc>>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            last_activity: Mutex::new(None),
        }
    }

    pub fn record_activity(&self) {
        self.active.store(true, Ordering::SeqCst);
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for ActivityTracker {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshOutcome {
    Completed,
    Failed,
    /// Another refresh was outstanding
    Skipped,
    /// The scope changed while the refresh ran
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Synced,
    Syncing,
    Error,
}

/// Sync indicator state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_refreshing: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub polling: bool,
    pub interval_ms: u64,
    pub active: bool,
    pub suggested_interval_ms: u64,
}

struct SchedulerShared {
    fetch: FetchFn,
    is_refreshing: AtomicBool,
    last_update: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Clears the in-flight flag however the refresh ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SchedulerShared {
    async fn refresh(&self, scheduler_id: Uuid) -> RefreshOutcome {
        if self
            .is_refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(%scheduler_id, "refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        }
        let _guard = RefreshGuard(&self.is_refreshing);

        match (self.fetch)().await {
            Ok(()) => {
                *self.last_update.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
                RefreshOutcome::Completed
            }
            Err(SyncError::ScopeChanged) => {
                tracing::debug!(%scheduler_id, "refresh outlived its scope");
                RefreshOutcome::Discarded
            }
            Err(e) => {
                tracing::warn!(%scheduler_id, error = %e, "refresh failed");
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.message());
                RefreshOutcome::Failed
            }
        }
    }
}

/// Timer-driven refresher for one scope.
pub struct PollingScheduler {
    id: Uuid,
    config: PollConfig,
    shared: Arc<SchedulerShared>,
    activity: Arc<dyn ActivitySource>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingScheduler {
    /// Start polling. The first refresh is dispatched immediately.
    pub fn start(fetch: FetchFn, config: PollConfig, activity: Arc<dyn ActivitySource>) -> Self {
        let id = Uuid::new_v4();
        let shared = Arc::new(SchedulerShared {
            fetch,
            is_refreshing: AtomicBool::new(false),
            last_update: Mutex::new(None),
            last_error: Mutex::new(None),
        });
        let cancel = CancellationToken::new();

        let task = if config.enabled {
            let shared = shared.clone();
            let cancel = cancel.clone();
            let period = config.interval.max(MIN_POLL_INTERVAL);
            tracing::info!(scheduler_id = %id, interval_ms = period.as_millis() as u64, "polling started");

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let shared = shared.clone();
                            tokio::spawn(async move {
                                shared.refresh(id).await;
                            });
                        }
                    }
                }
                tracing::info!(scheduler_id = %id, "polling stopped");
            })
        } else {
            tracing::info!(scheduler_id = %id, "polling disabled, refreshing once");
            let shared = shared.clone();
            tokio::spawn(async move {
                shared.refresh(id).await;
            })
        };

        Self {
            id,
            config,
            shared,
            activity,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Manual refresh; dropped if one is already outstanding.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.shared.refresh(self.id).await
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.is_refreshing.load(Ordering::SeqCst)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> SyncStatus {
        let is_refreshing = self.is_refreshing();
        let last_error = self.last_error();
        let state = if is_refreshing {
            SyncState::Syncing
        } else if last_error.is_some() {
            SyncState::Error
        } else {
            SyncState::Synced
        };

        SyncStatus {
            state,
            is_refreshing,
            last_update: self.last_update(),
            last_error,
            polling: self.config.enabled && !self.cancel.is_cancelled(),
            interval_ms: self.config.interval.as_millis() as u64,
            active: self.activity.is_active(),
            suggested_interval_ms: self.activity.suggested_interval().as_millis() as u64,
        }
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(scheduler_id = %self.id, "stopping scheduler");
        }
        self.cancel.cancel();
    }

    /// Stop and wait for the timer task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
