//! Offline-first local store and sync engine for POS terminals.
//!
//! A cashier terminal keeps taking orders and payments while disconnected:
//! reads and writes go to an embedded SQLite store ([`store::LocalStore`]),
//! writes are tagged pending, and a background service ([`sync::SyncService`])
//! periodically pushes pending records to the backend and pulls catalog
//! updates once connectivity returns. UI components subscribe to live
//! queries ([`reactive::LiveQuery`]) instead of polling.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pos_sync_engine::{
//!     HttpRemoteApi, LocalStore, SessionLifecycle, SessionTokens, SyncService,
//! };
//!
//! # fn main() -> pos_sync_engine::Result<()> {
//! let store = LocalStore::open(std::path::Path::new("/var/lib/pos"))?;
//! let remote = Arc::new(HttpRemoteApi::new("https://admin.example.com")?);
//! let tokens = Arc::new(SessionTokens::new());
//! let sync = SyncService::new(store.clone(), remote, tokens.clone());
//!
//! let session = SessionLifecycle::new(tokens, sync, Duration::from_secs(15));
//! session.on_login("access-token");
//!
//! let pending = store.watch_pending_sync_count();
//! # let _ = pending;
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod queries;
pub mod reactive;
pub mod remote;
pub mod store;
pub mod sync;

pub use auth::{AccessTokenProvider, SessionLifecycle, SessionTokens};
pub use error::{Error, Result};
pub use models::{
    LineItem, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus, Product, SyncMetadata,
    SyncStatus,
};
pub use reactive::{Collection, LiveQuery, QueryRegistry};
pub use remote::{HttpRemoteApi, RemoteApi, UpsertAck};
pub use store::{CatalogChanges, LocalStore, PendingItem};
pub use sync::{CycleOutcome, SyncPhase, SyncService, SyncStatusReport};

/// Initialize structured logging (console + rolling daily file in
/// `log_dir`). Call once at startup, before the store is opened.
pub fn init_tracing(log_dir: &std::path::Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pos_sync_engine=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "pos-sync");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the process — dropping it
    // flushes logs.
    std::mem::forget(guard);
}
