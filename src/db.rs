//! Local SQLite database layer for the terminal.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, the singleton
//! sync-metadata row, and crash recovery for rows left mid-sync.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Acquire the connection lock, mapping a poisoned mutex into the
    /// transaction error domain.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Transaction("database mutex poisoned".into()))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/terminal.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once. Any row left in the transient
/// `syncing` state by a crash is normalised back to `pending`.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("terminal.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;
    ensure_device_identity(&conn)?;

    let normalised = normalize_interrupted_sync(&conn)?;
    if normalised > 0 {
        info!(rows = normalised, "Recovered rows left mid-sync to pending");
    }

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: core collections.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- products (cached catalog projection, server-authoritative)
        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            stock_quantity INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        );

        -- orders (terminal-authored)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            line_items TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'completed', 'cancelled')),
            subtotal REAL NOT NULL DEFAULT 0,
            tax_amount REAL NOT NULL DEFAULT 0,
            total_amount REAL NOT NULL DEFAULT 0,
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('pending', 'syncing', 'synced', 'failed')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- payments (terminal-authored, always tied to a local order)
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL CHECK (method IN ('cash', 'card', 'other')),
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('pending', 'syncing', 'synced', 'failed')),
            created_at TEXT NOT NULL,
            FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE
        );

        -- sync_metadata (singleton row)
        CREATE TABLE IF NOT EXISTS sync_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            device_id TEXT NOT NULL,
            last_sync_time TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_orders_sync_status ON orders(sync_status);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
        CREATE INDEX IF NOT EXISTS idx_payments_sync_status ON payments(sync_status);
        CREATE INDEX IF NOT EXISTS idx_payments_order_id ON payments(order_id);
        CREATE INDEX IF NOT EXISTS idx_products_is_active ON products(is_active);
        CREATE INDEX IF NOT EXISTS idx_products_name ON products(name);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: server-confirmed identifiers attached on push.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE orders ADD COLUMN server_id TEXT;
        ALTER TABLE payments ADD COLUMN server_id TEXT;

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )?;

    info!("Applied migration v2 (server ids)");
    Ok(())
}

/// Migration v3: payment voiding.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        ALTER TABLE payments ADD COLUMN status TEXT NOT NULL DEFAULT 'completed'
            CHECK (status IN ('completed', 'voided'));

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )?;

    info!("Applied migration v3 (payment voiding)");
    Ok(())
}

/// Seed the singleton sync-metadata row with a device id on first run.
/// The id is immutable afterwards.
fn ensure_device_identity(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_metadata (id, device_id) VALUES (1, ?1)
         ON CONFLICT(id) DO NOTHING",
        [Uuid::new_v4().to_string()],
    )?;
    Ok(())
}

/// Reset rows left in the transient `syncing` state to `pending`.
///
/// The sync service's cycle state lives only in process memory, so a
/// crash mid-push leaves rows marked `syncing` with no cycle to finish
/// them. They rejoin the pending queue on the next open.
fn normalize_interrupted_sync(conn: &Connection) -> Result<usize> {
    let orders = conn.execute(
        "UPDATE orders SET sync_status = 'pending' WHERE sync_status = 'syncing'",
        [],
    )?;
    let payments = conn.execute(
        "UPDATE payments SET sync_status = 'pending' WHERE sync_status = 'syncing'",
        [],
    )?;
    Ok(orders + payments)
}

/// Run migrations on an arbitrary connection. Test support for modules
/// that operate on in-memory databases.
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("test migrations");
    ensure_device_identity(conn).expect("test device identity");
}
