//! Background sync service.
//!
//! Orchestrates pull-then-push reconciliation between the local store and
//! the sync backend. A background loop ticks on a fixed interval; each
//! tick runs at most one cycle (push pending orders/payments oldest
//! first, then pull catalog updates). One item's failure never aborts a
//! cycle, and a cycle always completes and releases its lock, even fully
//! offline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::AccessTokenProvider;
use crate::error::Result;
use crate::remote::RemoteApi;
use crate::store::{LocalStore, PendingItem};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Sync service state. `Syncing` guards the at-most-one-concurrent-cycle
/// invariant: a tick arriving while a cycle runs is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Syncing,
    Stopped,
}

/// What one sync cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub pushed: usize,
    pub push_failed: usize,
    pub pulled: usize,
    pub catalog_removed: usize,
    pub pull_ok: bool,
}

/// Snapshot of sync health for UI indicators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub phase: SyncPhase,
    pub auto_sync_running: bool,
    pub pending_count: i64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub device_id: String,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Reconciles the local store with the remote system of record.
///
/// The phase mutex is the single-writer guard over cycle execution; the
/// running flag and epoch only steer the background loop. None of this
/// state is persisted: after a crash, rows the cycle had claimed are
/// normalised back to `pending` when the database reopens, and a fresh
/// cycle simply picks them up.
pub struct SyncService {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    auth: Arc<dyn AccessTokenProvider>,
    phase: Mutex<SyncPhase>,
    is_running: AtomicBool,
    /// Invalidates stale background loops when auto-sync is restarted.
    epoch: AtomicU64,
    /// Sticky until the next `start_auto_sync`. A cycle that finishes
    /// after a stop parks the phase at `Stopped` instead of `Idle`.
    stop_requested: AtomicBool,
}

impl SyncService {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteApi>,
        auth: Arc<dyn AccessTokenProvider>,
    ) -> Arc<Self> {
        Arc::new(SyncService {
            store,
            remote,
            auth,
            phase: Mutex::new(SyncPhase::Idle),
            is_running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
        })
    }

    /// Current state machine phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase.lock().map(|p| *p).unwrap_or(SyncPhase::Stopped)
    }

    /// Start the periodic sync loop. Each tick attempts a cycle only if
    /// the service is idle. Calling again while running is a no-op;
    /// calling after a stop restarts the loop.
    pub fn start_auto_sync(self: Arc<Self>, interval: Duration) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_requested.store(false, Ordering::SeqCst);
        if self.is_running.swap(true, Ordering::SeqCst) {
            debug!("Auto-sync already running, loop restarted with new interval");
        }
        if let Ok(mut phase) = self.phase.lock() {
            if *phase == SyncPhase::Stopped {
                *phase = SyncPhase::Idle;
            }
        }

        let service = self;
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Sync loop started");
            loop {
                tokio::time::sleep(interval).await;
                if service.epoch.load(Ordering::SeqCst) != epoch
                    || !service.is_running.load(Ordering::SeqCst)
                {
                    break;
                }
                service.try_run_cycle().await;
            }
            info!("Sync loop stopped");
        });
    }

    /// Stop the periodic loop. Cooperative: an in-flight cycle finishes
    /// and updates state, but no new cycle starts afterwards.
    pub fn stop_auto_sync(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Ok(mut phase) = self.phase.lock() {
            if *phase != SyncPhase::Syncing {
                *phase = SyncPhase::Stopped;
            }
        }
    }

    /// Run one cycle immediately, subject to the same guards as a timer
    /// tick: skipped unless the service is idle and a token is present.
    pub async fn sync_now(&self) -> Option<CycleOutcome> {
        self.try_run_cycle().await
    }

    /// Sync health snapshot for UI indicators.
    pub fn status(&self) -> Result<SyncStatusReport> {
        let meta = self.store.sync_metadata()?;
        Ok(SyncStatusReport {
            phase: self.phase(),
            auto_sync_running: self.is_running.load(Ordering::SeqCst),
            pending_count: self.store.pending_sync_count()?,
            last_sync_time: meta.last_sync_time,
            device_id: meta.device_id,
        })
    }

    // -----------------------------------------------------------------------
    // Cycle execution
    // -----------------------------------------------------------------------

    async fn try_run_cycle(&self) -> Option<CycleOutcome> {
        // No token, no cycle. Skipped silently: not an error.
        let Some(token) = self.auth.access_token() else {
            debug!("Sync cycle skipped: no access token");
            return None;
        };

        {
            let Ok(mut phase) = self.phase.lock() else {
                return None;
            };
            if *phase != SyncPhase::Idle {
                let current = *phase;
                debug!(?current, "Sync tick skipped");
                return None;
            }
            *phase = SyncPhase::Syncing;
        }

        let outcome = self.run_cycle(&token).await;

        if let Ok(mut phase) = self.phase.lock() {
            *phase = if self.stop_requested.load(Ordering::SeqCst) {
                SyncPhase::Stopped
            } else {
                SyncPhase::Idle
            };
        }

        match outcome {
            Ok(outcome) => {
                if outcome.pushed > 0 || outcome.pulled > 0 || outcome.catalog_removed > 0 {
                    info!(
                        pushed = outcome.pushed,
                        failed = outcome.push_failed,
                        pulled = outcome.pulled,
                        removed = outcome.catalog_removed,
                        "Sync cycle complete"
                    );
                }
                Some(outcome)
            }
            Err(error) => {
                warn!(%error, "Sync cycle failed");
                None
            }
        }
    }

    /// One push-then-pull pass. Remote failures are absorbed per item or
    /// per phase; only local store failures abort the cycle.
    async fn run_cycle(&self, token: &str) -> Result<CycleOutcome> {
        let cycle_start = Utc::now();
        let mut outcome = CycleOutcome::default();

        // Push phase. The queue is snapshotted at phase start: a write
        // landing mid-cycle stays `pending` and is picked up next cycle,
        // never lost, never double-counted.
        let pending = self.store.pending_sync_items()?;
        if !pending.is_empty() {
            debug!(items = pending.len(), "Push phase starting");
        }
        for item in &pending {
            // The row may have moved on since the snapshot (e.g. already
            // synced by an explicit sync_now racing this cycle).
            if !self.store.begin_push(item)? {
                continue;
            }

            let result = match item {
                PendingItem::Order(order) => self.remote.upsert_order(token, order).await,
                PendingItem::Payment(payment) => self.remote.upsert_payment(token, payment).await,
            };

            match result {
                Ok(ack) => {
                    self.store
                        .finish_push_success(item, ack.server_id.as_deref())?;
                    outcome.pushed += 1;
                }
                Err(error) => {
                    self.store.finish_push_failure(item)?;
                    outcome.push_failed += 1;
                    warn!(id = item.id(), %error, "Push failed, will retry next cycle");
                }
            }
        }

        // Pull phase. Server wins on products: pulled rows overwrite
        // local state wholesale, inactive rows are dropped.
        let meta = self.store.sync_metadata()?;
        match self
            .remote
            .fetch_catalog_since(token, meta.last_sync_time)
            .await
        {
            Ok(products) => {
                let changes = self.store.apply_catalog(&products)?;
                outcome.pulled = changes.upserted;
                outcome.catalog_removed = changes.removed;
                outcome.pull_ok = true;
                // The cycle's start timestamp, not its end: anything
                // updated remotely while this cycle ran is re-fetched
                // next time instead of slipping through the window.
                self.store.advance_last_sync_time(cycle_start)?;
            }
            Err(error) => {
                warn!(%error, "Pull phase failed, last sync time not advanced");
            }
        }

        Ok(outcome)
    }
}
