//! Local store for the terminal.
//!
//! Durable, transactional, embedded storage keyed by record id within the
//! named collections (`products`, `orders`, `payments`, `sync_metadata`).
//! Reads are always served locally and never block on the network; writes
//! are optimistic, immediately visible, and tag the record `pending` for
//! the sync service to drain. Every commit notifies the reactive query
//! registry with the set of collections it touched.

use chrono::{DateTime, Local, LocalResult, NaiveTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::db::{self, DbState};
use crate::error::{Error, Result};
use crate::models::{Order, OrderStatus, Payment, Product, SyncMetadata, SyncStatus};
use crate::reactive::{Collection, QueryRegistry};

const ORDER_COLUMNS: &str =
    "id, line_items, status, subtotal, tax_amount, total_amount, sync_status, server_id, \
     created_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, order_id, amount, method, status, sync_status, server_id, created_at";
const PRODUCT_COLUMNS: &str = "id, name, price, stock_quantity, is_active, updated_at";

/// Handle to the terminal's local store. Cheap to clone; all clones share
/// the same connection and query registry.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<DbState>,
    registry: Arc<QueryRegistry>,
}

/// An Order or Payment awaiting push, in causal (creation) order.
#[derive(Debug, Clone)]
pub enum PendingItem {
    Order(Order),
    Payment(Payment),
}

impl PendingItem {
    pub fn id(&self) -> &str {
        match self {
            PendingItem::Order(order) => &order.id,
            PendingItem::Payment(payment) => &payment.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            PendingItem::Order(order) => order.created_at,
            PendingItem::Payment(payment) => payment.created_at,
        }
    }

    fn collection(&self) -> Collection {
        match self {
            PendingItem::Order(_) => Collection::Orders,
            PendingItem::Payment(_) => Collection::Payments,
        }
    }
}

/// Outcome of applying a catalog pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogChanges {
    pub upserted: usize,
    pub removed: usize,
}

impl LocalStore {
    /// Open (or create) the store under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self::new(Arc::new(db::init(data_dir)?)))
    }

    /// Wrap an already-initialized database.
    pub fn new(db: Arc<DbState>) -> Self {
        LocalStore {
            db,
            registry: Arc::new(QueryRegistry::new()),
        }
    }

    /// The reactive query registry attached to this store.
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Scoped transactions
    // -----------------------------------------------------------------------

    /// Run `scope` inside a single transaction: all member writes commit
    /// together or none do. On commit the registry is notified once with
    /// every collection the scope touched, so subscribers never observe a
    /// half-applied transaction. On error everything is rolled back and
    /// the scope's error is returned unchanged.
    pub fn transaction<T>(&self, scope: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let conn = self.db.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::Transaction(format!("begin: {e}")))?;

        let mut tx = Transaction {
            conn: &conn,
            touched: HashSet::new(),
        };
        let outcome = scope(&mut tx);
        let touched = std::mem::take(&mut tx.touched);
        drop(tx);

        match outcome {
            Ok(value) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(Error::Transaction(format!("commit: {e}")));
                }
                drop(conn);
                self.registry.notify(touched);
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    return Err(Error::Transaction(format!(
                        "rollback after `{error}` failed: {rollback_err}"
                    )));
                }
                Err(error)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert an order. Any local write re-enters the pending queue,
    /// overriding a prior `synced`/`failed` state.
    pub fn put_order(&self, order: &Order) -> Result<()> {
        self.transaction(|tx| tx.put_order(order))
    }

    /// Upsert a payment. The referenced order must exist locally.
    pub fn put_payment(&self, payment: &Payment) -> Result<()> {
        self.transaction(|tx| tx.put_payment(payment))
    }

    /// Soft-delete an order: flips its status to `cancelled` and tags it
    /// pending so the cancellation syncs like any other edit. Only draft
    /// orders can be cancelled.
    pub fn cancel_order(&self, id: &str) -> Result<()> {
        self.transaction(|tx| tx.cancel_order(id))
    }

    /// Soft-delete a payment: flips its status to `voided`, keeping the
    /// row (and its place in the sync queue) intact.
    pub fn void_payment(&self, id: &str) -> Result<()> {
        self.transaction(|tx| tx.void_payment(id))
    }

    /// Apply one catalog pull wholesale, in a single transaction. The
    /// server is authoritative for products: active rows replace local
    /// state entirely (stock included), inactive rows are hard-deleted.
    pub fn apply_catalog(&self, products: &[Product]) -> Result<CatalogChanges> {
        let changes = self.transaction(|tx| {
            let mut changes = CatalogChanges::default();
            for product in products {
                if product.is_active {
                    tx.upsert_product(product)?;
                    changes.upserted += 1;
                } else if tx.delete_product(&product.id)? {
                    changes.removed += 1;
                }
            }
            Ok(changes)
        })?;
        debug!(
            upserted = changes.upserted,
            removed = changes.removed,
            "Catalog pull applied"
        );
        Ok(changes)
    }

    // -----------------------------------------------------------------------
    // Reads (snapshot as of call time, never touch the network)
    // -----------------------------------------------------------------------

    pub fn product(&self, id: &str) -> Result<Option<Product>> {
        let conn = self.db.lock()?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], product_from_row)
            .optional()?)
    }

    /// All active catalog products, by name.
    pub fn products(&self) -> Result<Vec<Product>> {
        let conn = self.db.lock()?;
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name");
        collect_rows(&conn, &sql, params![], product_from_row)
    }

    /// Active products whose name contains `term` (case-insensitive).
    pub fn search_products(&self, term: &str) -> Result<Vec<Product>> {
        let pattern = format!("%{}%", escape_like(term));
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND name LIKE ?1 ESCAPE '\\' ORDER BY name"
        );
        collect_rows(&conn, &sql, params![pattern], product_from_row)
    }

    pub fn order(&self, id: &str) -> Result<Option<Order>> {
        let conn = self.db.lock()?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], order_from_row).optional()?)
    }

    pub fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ?1 ORDER BY created_at DESC"
        );
        collect_rows(&conn, &sql, params![status], order_from_row)
    }

    /// Orders created since local midnight, newest first.
    pub fn todays_orders(&self) -> Result<Vec<Order>> {
        let threshold = start_of_local_day().to_rfc3339();
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE created_at >= ?1 ORDER BY created_at DESC"
        );
        collect_rows(&conn, &sql, params![threshold], order_from_row)
    }

    pub fn payment(&self, id: &str) -> Result<Option<Payment>> {
        let conn = self.db.lock()?;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], payment_from_row)
            .optional()?)
    }

    pub fn payments_for_order(&self, order_id: &str) -> Result<Vec<Payment>> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1 ORDER BY created_at"
        );
        collect_rows(&conn, &sql, params![order_id], payment_from_row)
    }

    // -----------------------------------------------------------------------
    // Pending tracker (projection over orders + payments)
    // -----------------------------------------------------------------------

    /// All orders and payments with sync status `pending` or `failed`,
    /// oldest first across both collections so business events replay in
    /// causal order.
    pub fn pending_sync_items(&self) -> Result<Vec<PendingItem>> {
        let conn = self.db.lock()?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE sync_status IN ('pending', 'failed') ORDER BY created_at"
        );
        let orders = collect_rows(&conn, &sql, params![], order_from_row)?;

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE sync_status IN ('pending', 'failed') ORDER BY created_at"
        );
        let payments = collect_rows(&conn, &sql, params![], payment_from_row)?;

        let mut items: Vec<PendingItem> = orders
            .into_iter()
            .map(PendingItem::Order)
            .chain(payments.into_iter().map(PendingItem::Payment))
            .collect();
        // Stable sort: an order created at the same instant as its
        // payment stays ahead of it.
        items.sort_by_key(PendingItem::created_at);
        Ok(items)
    }

    /// Count of records with sync status `pending` or `failed`.
    pub fn pending_sync_count(&self) -> Result<i64> {
        let conn = self.db.lock()?;
        Ok(conn.query_row(
            "SELECT (SELECT COUNT(*) FROM orders WHERE sync_status IN ('pending', 'failed'))
                  + (SELECT COUNT(*) FROM payments WHERE sync_status IN ('pending', 'failed'))",
            [],
            |row| row.get(0),
        )?)
    }

    // -----------------------------------------------------------------------
    // Sync status transitions (sync service only)
    // -----------------------------------------------------------------------

    /// Claim a pending/failed item for the push phase. Returns false if
    /// the row is no longer in a claimable state.
    pub(crate) fn begin_push(&self, item: &PendingItem) -> Result<bool> {
        self.transition_sync_status(
            item,
            &[SyncStatus::Pending, SyncStatus::Failed],
            SyncStatus::Syncing,
            None,
        )
    }

    /// Mark a pushed item synced and attach the server-confirmed id if
    /// one was issued. Guarded on the transient `syncing` state: a local
    /// edit that arrived mid-push reset the row to `pending`, and that
    /// edit must win so it is picked up by the next cycle.
    pub(crate) fn finish_push_success(
        &self,
        item: &PendingItem,
        server_id: Option<&str>,
    ) -> Result<bool> {
        self.transition_sync_status(item, &[SyncStatus::Syncing], SyncStatus::Synced, server_id)
    }

    /// Mark a pushed item failed; it stays in the pending queue and is
    /// retried on the next cycle.
    pub(crate) fn finish_push_failure(&self, item: &PendingItem) -> Result<bool> {
        self.transition_sync_status(item, &[SyncStatus::Syncing], SyncStatus::Failed, None)
    }

    fn transition_sync_status(
        &self,
        item: &PendingItem,
        from: &[SyncStatus],
        to: SyncStatus,
        server_id: Option<&str>,
    ) -> Result<bool> {
        let table = match item {
            PendingItem::Order(_) => "orders",
            PendingItem::Payment(_) => "payments",
        };
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_db()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET sync_status = ?1, server_id = COALESCE(?2, server_id) \
             WHERE id = ?3 AND sync_status IN ({from_list})"
        );

        let changed = {
            let conn = self.db.lock()?;
            conn.execute(&sql, params![to, server_id, item.id()])?
        };
        if changed > 0 {
            self.registry.notify([item.collection()]);
        }
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Sync metadata
    // -----------------------------------------------------------------------

    pub fn sync_metadata(&self) -> Result<SyncMetadata> {
        let conn = self.db.lock()?;
        let (device_id, last_sync_time): (String, Option<String>) = conn.query_row(
            "SELECT device_id, last_sync_time FROM sync_metadata WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let last_sync_time = match last_sync_time {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::Validation(format!("stored last_sync_time: {e}")))?,
            ),
            None => None,
        };
        Ok(SyncMetadata {
            device_id,
            last_sync_time,
        })
    }

    /// Advance the last successful sync timestamp. Monotonic: an earlier
    /// timestamp is ignored.
    pub(crate) fn advance_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        let changed = {
            let conn = self.db.lock()?;
            conn.execute(
                "UPDATE sync_metadata SET last_sync_time = ?1 \
                 WHERE id = 1 AND (last_sync_time IS NULL OR last_sync_time < ?1)",
                params![at.to_rfc3339()],
            )?
        };
        if changed > 0 {
            self.registry.notify([Collection::SyncMetadata]);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transaction scope
// ---------------------------------------------------------------------------

/// Write scope handed to [`LocalStore::transaction`] closures. Collects
/// the touched collections so the registry is notified exactly once, at
/// commit.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    touched: HashSet<Collection>,
}

impl Transaction<'_> {
    /// Upsert an order. Validation runs before anything is written; a
    /// malformed record is never persisted. A completed order that the
    /// server has already confirmed is immutable.
    pub fn put_order(&mut self, order: &Order) -> Result<()> {
        order.validate()?;

        let existing: Option<(OrderStatus, SyncStatus)> = self
            .conn
            .query_row(
                "SELECT status, sync_status FROM orders WHERE id = ?1",
                params![order.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((OrderStatus::Completed, SyncStatus::Synced)) = existing {
            return Err(Error::Validation(format!(
                "order {}: completed and synced, further edits are not allowed",
                order.id
            )));
        }

        let line_items = serde_json::to_string(&order.line_items)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO orders (
                id, line_items, status, subtotal, tax_amount, total_amount,
                sync_status, server_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                line_items = excluded.line_items,
                status = excluded.status,
                subtotal = excluded.subtotal,
                tax_amount = excluded.tax_amount,
                total_amount = excluded.total_amount,
                sync_status = 'pending',
                server_id = COALESCE(excluded.server_id, orders.server_id),
                updated_at = excluded.updated_at",
            params![
                order.id,
                line_items,
                order.status,
                order.subtotal,
                order.tax,
                order.total,
                order.server_id,
                order.created_at.to_rfc3339(),
                now,
            ],
        )?;

        self.touched.insert(Collection::Orders);
        Ok(())
    }

    /// Upsert a payment. The referenced order must already exist in the
    /// local store.
    pub fn put_payment(&mut self, payment: &Payment) -> Result<()> {
        payment.validate()?;

        let order_exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM orders WHERE id = ?1",
                params![payment.order_id],
                |row| row.get(0),
            )
            .optional()?;
        if order_exists.is_none() {
            return Err(Error::Validation(format!(
                "payment {}: order not found: {}",
                payment.id, payment.order_id
            )));
        }

        self.conn.execute(
            "INSERT INTO payments (
                id, order_id, amount, method, status, sync_status, server_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                amount = excluded.amount,
                method = excluded.method,
                status = excluded.status,
                sync_status = 'pending',
                server_id = COALESCE(excluded.server_id, payments.server_id)",
            params![
                payment.id,
                payment.order_id,
                payment.amount,
                payment.method,
                payment.status,
                payment.server_id,
                payment.created_at.to_rfc3339(),
            ],
        )?;

        self.touched.insert(Collection::Payments);
        Ok(())
    }

    /// Replace a catalog product wholesale (pull path).
    pub fn upsert_product(&mut self, product: &Product) -> Result<()> {
        product.validate()?;
        self.conn.execute(
            "INSERT INTO products (id, name, price, stock_quantity, is_active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                stock_quantity = excluded.stock_quantity,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
            params![
                product.id,
                product.name,
                product.price,
                product.stock_quantity,
                product.is_active,
                product.updated_at.to_rfc3339(),
            ],
        )?;
        self.touched.insert(Collection::Products);
        Ok(())
    }

    /// Hard-delete a product (pull path only). Returns whether a row was
    /// removed.
    pub fn delete_product(&mut self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM products WHERE id = ?1", params![id])?;
        if changed > 0 {
            self.touched.insert(Collection::Products);
        }
        Ok(changed > 0)
    }

    /// Soft-delete an order (drafts only).
    pub fn cancel_order(&mut self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE orders SET status = 'cancelled', sync_status = 'pending', updated_at = ?2
             WHERE id = ?1 AND status = 'draft'",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(Error::Validation(format!(
                "order {id}: not found or not a draft"
            )));
        }
        self.touched.insert(Collection::Orders);
        Ok(())
    }

    /// Soft-delete a payment.
    pub fn void_payment(&mut self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE payments SET status = 'voided', sync_status = 'pending'
             WHERE id = ?1 AND status = 'completed'",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::Validation(format!(
                "payment {id}: not found or already voided"
            )));
        }
        self.touched.insert(Collection::Payments);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn timestamp_at(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let raw_items: String = row.get(1)?;
    let line_items = serde_json::from_str(&raw_items).map_err(|e| conversion_err(1, e))?;
    Ok(Order {
        id: row.get(0)?,
        line_items,
        status: row.get(2)?,
        subtotal: row.get(3)?,
        tax: row.get(4)?,
        total: row.get(5)?,
        sync_status: row.get(6)?,
        server_id: row.get(7)?,
        created_at: timestamp_at(8, row.get(8)?)?,
        updated_at: timestamp_at(9, row.get(9)?)?,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        order_id: row.get(1)?,
        amount: row.get(2)?,
        method: row.get(3)?,
        status: row.get(4)?,
        sync_status: row.get(5)?,
        server_id: row.get(6)?,
        created_at: timestamp_at(7, row.get(7)?)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        stock_quantity: row.get(3)?,
        is_active: row.get(4)?,
        updated_at: timestamp_at(5, row.get(5)?)?,
    })
}

fn collect_rows<T, P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Midnight of the current local day, in UTC.
fn start_of_local_day() -> DateTime<Utc> {
    let now = Local::now();
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        LocalResult::None => now.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, PaymentMethod, PaymentStatus};
    use std::sync::Mutex;

    pub(crate) fn test_store() -> LocalStore {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        LocalStore::new(Arc::new(DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }))
    }

    pub(crate) fn sample_order() -> Order {
        Order::new(
            vec![LineItem {
                product_id: "prod-1".into(),
                quantity: 2,
                unit_price: 50.0,
            }],
            100.0,
            8.0,
            108.0,
        )
    }

    fn sample_product(id: &str, stock: i64) -> Product {
        Product {
            id: id.into(),
            name: format!("Product {id}"),
            price: 4.5,
            stock_quantity: stock,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_order_round_trip() {
        let store = test_store();
        let order = sample_order();
        store.put_order(&order).expect("put");

        let loaded = store.order(&order.id).expect("get").expect("present");
        assert_eq!(loaded.id, order.id);
        assert_eq!(loaded.line_items, order.line_items);
        assert_eq!(loaded.subtotal, 100.0);
        assert_eq!(loaded.tax, 8.0);
        assert_eq!(loaded.total, 108.0);
        assert_eq!(loaded.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_invalid_order_rejected_and_not_persisted() {
        let store = test_store();
        let mut order = sample_order();
        order.total = 999.0;

        let err = store.put_order(&order).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.order(&order.id).unwrap().is_none());
        assert_eq!(store.pending_sync_count().unwrap(), 0);
    }

    #[test]
    fn test_local_edit_overrides_synced_status() {
        let store = test_store();
        let order = sample_order();
        store.put_order(&order).expect("put");

        let item = PendingItem::Order(order.clone());
        assert!(store.begin_push(&item).unwrap());
        assert!(store.finish_push_success(&item, Some("srv-1")).unwrap());
        assert_eq!(
            store.order(&order.id).unwrap().unwrap().sync_status,
            SyncStatus::Synced
        );

        // Editing the order locally re-enters the pending queue.
        store.put_order(&order).expect("edit");
        let loaded = store.order(&order.id).unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Pending);
        assert_eq!(loaded.server_id.as_deref(), Some("srv-1"), "server id kept");
    }

    #[test]
    fn test_completed_synced_order_is_immutable() {
        let store = test_store();
        let mut order = sample_order();
        order.status = OrderStatus::Completed;
        store.put_order(&order).expect("put");

        let item = PendingItem::Order(order.clone());
        store.begin_push(&item).unwrap();
        store.finish_push_success(&item, None).unwrap();

        let err = store.put_order(&order).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_payment_requires_local_order() {
        let store = test_store();
        let payment = Payment::new("no-such-order", 10.0, PaymentMethod::Cash);
        let err = store.put_payment(&payment).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.payment(&payment.id).unwrap().is_none());
    }

    #[test]
    fn test_cancel_order_and_void_payment() {
        let store = test_store();
        let order = sample_order();
        store.put_order(&order).expect("put order");
        let payment = Payment::new(order.id.clone(), 108.0, PaymentMethod::Card);
        store.put_payment(&payment).expect("put payment");

        store.cancel_order(&order.id).expect("cancel");
        let loaded = store.order(&order.id).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Cancelled);
        assert_eq!(loaded.sync_status, SyncStatus::Pending);

        store.void_payment(&payment.id).expect("void");
        let loaded = store.payment(&payment.id).unwrap().unwrap();
        assert_eq!(loaded.status, PaymentStatus::Voided);

        // Soft deletes keep the rows around.
        assert!(store.cancel_order(&order.id).is_err(), "not a draft anymore");
        assert!(store.void_payment(&payment.id).is_err(), "already voided");
    }

    #[test]
    fn test_pending_items_causal_order_and_statuses() {
        let store = test_store();

        let mut first = sample_order();
        first.created_at = Utc::now() - chrono::Duration::minutes(10);
        store.put_order(&first).expect("first");

        let mut second = sample_order();
        second.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.put_order(&second).expect("second");

        let mut payment = Payment::new(first.id.clone(), 108.0, PaymentMethod::Cash);
        payment.created_at = Utc::now() - chrono::Duration::minutes(7);
        store.put_payment(&payment).expect("payment");

        // Synced items leave the queue; failed items stay.
        let second_item = PendingItem::Order(second.clone());
        store.begin_push(&second_item).unwrap();
        store.finish_push_failure(&second_item).unwrap();

        let items = store.pending_sync_items().expect("pending");
        let ids: Vec<&str> = items.iter().map(PendingItem::id).collect();
        assert_eq!(ids, vec![first.id.as_str(), payment.id.as_str(), second.id.as_str()]);
        assert_eq!(store.pending_sync_count().unwrap(), 3);

        let first_item = PendingItem::Order(first.clone());
        store.begin_push(&first_item).unwrap();
        store.finish_push_success(&first_item, None).unwrap();
        assert_eq!(store.pending_sync_count().unwrap(), 2);
    }

    #[test]
    fn test_push_transitions_never_clobber_concurrent_edit() {
        let store = test_store();
        let order = sample_order();
        store.put_order(&order).expect("put");
        let item = PendingItem::Order(order.clone());

        assert!(store.begin_push(&item).unwrap());
        // A cashier edit lands while the upsert is in flight.
        store.put_order(&order).expect("mid-flight edit");

        // The ack arrives, but the row left `syncing`; the edit wins.
        assert!(!store.finish_push_success(&item, Some("srv-9")).unwrap());
        let loaded = store.order(&order.id).unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Pending);
        assert!(loaded.server_id.is_none());
    }

    #[test]
    fn test_begin_push_only_claims_pending_or_failed() {
        let store = test_store();
        let order = sample_order();
        store.put_order(&order).expect("put");
        let item = PendingItem::Order(order.clone());

        assert!(store.begin_push(&item).unwrap());
        assert!(!store.begin_push(&item).unwrap(), "already syncing");

        store.finish_push_success(&item, None).unwrap();
        assert!(!store.begin_push(&item).unwrap(), "already synced");
    }

    #[test]
    fn test_transaction_rolls_back_all_member_writes() {
        let store = test_store();
        let order = sample_order();
        let payment = Payment::new(order.id.clone(), 108.0, PaymentMethod::Cash);

        let result: Result<()> = store.transaction(|tx| {
            tx.put_order(&order)?;
            tx.put_payment(&payment)?;
            Err(Error::Validation("change of heart".into()))
        });
        assert!(result.is_err());

        assert!(store.order(&order.id).unwrap().is_none());
        assert!(store.payment(&payment.id).unwrap().is_none());
        assert_eq!(store.pending_sync_count().unwrap(), 0);
    }

    #[test]
    fn test_order_and_payment_commit_together() {
        let store = test_store();
        let order = sample_order();
        let payment = Payment::new(order.id.clone(), 108.0, PaymentMethod::Card);

        store
            .transaction(|tx| {
                tx.put_order(&order)?;
                tx.put_payment(&payment)
            })
            .expect("atomic checkout");

        assert!(store.order(&order.id).unwrap().is_some());
        assert!(store.payment(&payment.id).unwrap().is_some());
        assert_eq!(store.pending_sync_count().unwrap(), 2);
    }

    #[test]
    fn test_catalog_pull_overwrites_wholesale() {
        let store = test_store();
        let mut local = sample_product("prod-1", 5);
        local.price = 9.0;
        store
            .transaction(|tx| tx.upsert_product(&local))
            .expect("seed");

        let mut pulled = sample_product("prod-1", 2);
        pulled.price = 4.0;
        pulled.name = "Renamed".into();
        let changes = store.apply_catalog(std::slice::from_ref(&pulled)).expect("pull");
        assert_eq!(changes, CatalogChanges { upserted: 1, removed: 0 });

        let loaded = store.product("prod-1").unwrap().unwrap();
        assert_eq!(loaded.stock_quantity, 2, "stock replaced regardless of local state");
        assert_eq!(loaded.price, 4.0);
        assert_eq!(loaded.name, "Renamed");
    }

    #[test]
    fn test_catalog_pull_hard_deletes_inactive_products() {
        let store = test_store();
        store
            .transaction(|tx| tx.upsert_product(&sample_product("prod-1", 5)))
            .expect("seed");

        let mut retired = sample_product("prod-1", 0);
        retired.is_active = false;
        let changes = store.apply_catalog(std::slice::from_ref(&retired)).expect("pull");
        assert_eq!(changes, CatalogChanges { upserted: 0, removed: 1 });
        assert!(store.product("prod-1").unwrap().is_none());
    }

    #[test]
    fn test_product_search_escapes_wildcards() {
        let store = test_store();
        let mut espresso = sample_product("prod-1", 1);
        espresso.name = "Espresso".into();
        let mut percent = sample_product("prod-2", 1);
        percent.name = "100% Juice".into();
        store
            .transaction(|tx| {
                tx.upsert_product(&espresso)?;
                tx.upsert_product(&percent)
            })
            .expect("seed");

        let hits = store.search_products("spres").expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Espresso");

        let hits = store.search_products("100%").expect("search literal percent");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "100% Juice");
    }

    #[test]
    fn test_sync_metadata_and_monotonic_last_sync() {
        let store = test_store();
        let meta = store.sync_metadata().expect("metadata");
        assert!(!meta.device_id.is_empty());
        assert!(meta.last_sync_time.is_none());

        let later = Utc::now();
        let earlier = later - chrono::Duration::minutes(3);
        store.advance_last_sync_time(later).expect("advance");
        store.advance_last_sync_time(earlier).expect("ignored");

        let meta = store.sync_metadata().expect("metadata");
        assert_eq!(meta.last_sync_time, Some(later));
    }

    #[test]
    fn test_durability_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let order = sample_order();

        {
            let store = LocalStore::open(dir.path()).expect("open");
            store.put_order(&order).expect("put");
        }

        let store = LocalStore::open(dir.path()).expect("reopen");
        let loaded = store.order(&order.id).expect("get").expect("survived restart");
        assert_eq!(loaded.total, 108.0);
        assert_eq!(loaded.sync_status, SyncStatus::Pending);
    }
}
