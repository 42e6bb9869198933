//! Reactive query layer.
//!
//! UI components register a query once and get pushed fresh results
//! whenever a write touches a collection the query reads from; they never
//! poll the store. Registrations live in an explicit registry with manual
//! unsubscribe handles. Commits notify the registry, and a dirty-set
//! behind a pending-flush flag coalesces bursts of writes so a query is
//! re-evaluated at most once per batch and never observes a half-applied
//! transaction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tracing::warn;

use crate::error::Result;

/// Named collections of the local store. Queries declare which ones they
/// read; writes declare which ones they touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Products,
    Orders,
    Payments,
    SyncMetadata,
}

struct Registration {
    collections: HashSet<Collection>,
    rerun: Arc<dyn Fn() + Send + Sync>,
}

struct RegistryInner {
    queries: HashMap<u64, Registration>,
    dirty: HashSet<Collection>,
    flushing: bool,
}

/// Subscriber registry. One per store.
pub struct QueryRegistry {
    inner: Mutex<RegistryInner>,
    next_id: AtomicU64,
}

impl QueryRegistry {
    pub fn new() -> Self {
        QueryRegistry {
            inner: Mutex::new(RegistryInner {
                queries: HashMap::new(),
                dirty: HashSet::new(),
                flushing: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a query over the given collections.
    ///
    /// The query runs once eagerly, so the returned handle carries a
    /// result before the first write. A failed re-evaluation keeps the
    /// previous result; the handle never reverts to empty.
    pub fn register<T, F>(self: Arc<Self>, collections: &[Collection], query: F) -> LiveQuery<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let rerun: Arc<dyn Fn() + Send + Sync> = Arc::new(move || match query() {
            Ok(value) => {
                let _ = tx.send(Some(value));
            }
            Err(error) => {
                warn!(%error, "live query re-evaluation failed, keeping previous result");
            }
        });

        rerun();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut inner) = self.inner.lock() {
            inner.queries.insert(
                id,
                Registration {
                    collections: collections.iter().copied().collect(),
                    rerun,
                },
            );
        }

        LiveQuery {
            id,
            registry: Arc::downgrade(&self),
            rx,
        }
    }

    /// Re-run every query reading from any of the touched collections.
    ///
    /// Called after a commit, with the connection lock already released.
    /// If a flush is already in progress the collections are only added
    /// to the dirty set; the running flush loop drains them, which is
    /// what coalesces nested or concurrent write bursts into a single
    /// re-evaluation per query.
    pub fn notify(&self, touched: impl IntoIterator<Item = Collection>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.dirty.extend(touched);
        if inner.flushing || inner.dirty.is_empty() {
            return;
        }
        inner.flushing = true;

        loop {
            let dirty = std::mem::take(&mut inner.dirty);
            if dirty.is_empty() {
                inner.flushing = false;
                return;
            }

            let to_run: Vec<Arc<dyn Fn() + Send + Sync>> = inner
                .queries
                .values()
                .filter(|reg| reg.collections.iter().any(|c| dirty.contains(c)))
                .map(|reg| reg.rerun.clone())
                .collect();

            // Queries take their own locks; never hold ours while they run.
            drop(inner);
            for rerun in to_run {
                rerun();
            }

            inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
        }
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.queries.len()).unwrap_or(0)
    }

    fn remove(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.queries.remove(&id);
        }
    }
}

impl Default for QueryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered live query.
///
/// Holds `None` only until the first evaluation completes (which happens
/// at registration), then always the most recent result. Dropping the
/// handle unsubscribes; no further emissions occur after teardown.
pub struct LiveQuery<T> {
    id: u64,
    registry: Weak<QueryRegistry>,
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> LiveQuery<T> {
    /// Most recent result, if the first evaluation has completed.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next emission. Returns `false` once the query has
    /// been torn down and no further emissions can occur.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// A second subscription to the same query, for fanning one
    /// registered query out to several consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    /// Tear the query down immediately. Equivalent to dropping the
    /// handle.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
