//! Live-updating reads exposed to UI components.
//!
//! Each returns a [`LiveQuery`] registered against the store's query
//! registry: the result is pushed to the handle whenever a commit touches
//! a collection the query reads from. The UI never polls.

use chrono::{DateTime, Utc};

use crate::models::{Order, OrderStatus, Product};
use crate::reactive::{Collection, LiveQuery};
use crate::store::LocalStore;

impl LocalStore {
    /// Count of orders and payments still awaiting sync (`pending` or
    /// `failed`). The one user-visible signal of sync trouble, together
    /// with a stale last-sync time.
    pub fn watch_pending_sync_count(&self) -> LiveQuery<i64> {
        let store = self.clone();
        self.registry().clone()
            .register(&[Collection::Orders, Collection::Payments], move || {
                store.pending_sync_count()
            })
    }

    /// All active catalog products.
    pub fn watch_products(&self) -> LiveQuery<Vec<Product>> {
        let store = self.clone();
        self.registry().clone()
            .register(&[Collection::Products], move || store.products())
    }

    /// Active products whose name matches `term`.
    pub fn watch_product_search(&self, term: &str) -> LiveQuery<Vec<Product>> {
        let store = self.clone();
        let term = term.to_string();
        self.registry().clone()
            .register(&[Collection::Products], move || store.search_products(&term))
    }

    /// Orders created since local midnight, newest first.
    pub fn watch_todays_orders(&self) -> LiveQuery<Vec<Order>> {
        let store = self.clone();
        self.registry().clone()
            .register(&[Collection::Orders], move || store.todays_orders())
    }

    /// Orders in the given lifecycle state, newest first.
    pub fn watch_orders_by_status(&self, status: OrderStatus) -> LiveQuery<Vec<Order>> {
        let store = self.clone();
        self.registry().clone()
            .register(&[Collection::Orders], move || store.orders_by_status(status))
    }

    /// Timestamp of the last completed sync cycle, absent until the first
    /// one finishes.
    pub fn watch_last_sync_time(&self) -> LiveQuery<Option<DateTime<Utc>>> {
        let store = self.clone();
        self.registry().clone().register(&[Collection::SyncMetadata], move || {
            store.sync_metadata().map(|meta| meta.last_sync_time)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, DbState};
    use crate::models::{LineItem, Payment, PaymentMethod};
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn test_store() -> LocalStore {
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

    fn sample_order() -> Order {
        Order::new(
            vec![LineItem {
                product_id: "prod-1".into(),
                quantity: 1,
                unit_price: 100.0,
            }],
            100.0,
            8.0,
            108.0,
        )
    }

    #[test]
    fn test_pending_count_tracks_writes() {
        let store = test_store();
        let count = store.watch_pending_sync_count();
        assert_eq!(count.latest(), Some(0));

        let order = sample_order();
        store.put_order(&order).expect("put order");
        assert_eq!(count.latest(), Some(1));

        let payment = Payment::new(order.id.clone(), 108.0, PaymentMethod::Cash);
        store.put_payment(&payment).expect("put payment");
        assert_eq!(count.latest(), Some(2));
    }

    #[test]
    fn test_two_writes_in_one_transaction_reevaluate_once() {
        let store = test_store();
        let evals = Arc::new(AtomicUsize::new(0));

        let evals_inner = evals.clone();
        let reader = store.clone();
        let today = store.registry().clone().register(&[Collection::Orders], move || {
            evals_inner.fetch_add(1, Ordering::SeqCst);
            reader.todays_orders()
        });

        let order = sample_order();
        let mut edited = order.clone();
        edited.tax = 10.0;
        edited.total = 110.0;

        store
            .transaction(|tx| {
                tx.put_order(&order)?;
                tx.put_order(&edited)
            })
            .expect("two writes, one commit");

        assert_eq!(evals.load(Ordering::SeqCst), 2, "eager + exactly one rerun");
        let seen = today.latest().expect("evaluated");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].total, 110.0);
    }

    #[test]
    fn test_products_and_search_follow_catalog_pulls() {
        let store = test_store();
        let products = store.watch_products();
        let search = store.watch_product_search("esp");
        assert_eq!(products.latest(), Some(Vec::new()));

        let pulled = vec![
            Product {
                id: "p1".into(),
                name: "Espresso".into(),
                price: 2.5,
                stock_quantity: 10,
                is_active: true,
                updated_at: Utc::now(),
            },
            Product {
                id: "p2".into(),
                name: "Tea".into(),
                price: 2.0,
                stock_quantity: 4,
                is_active: true,
                updated_at: Utc::now(),
            },
        ];
        store.apply_catalog(&pulled).expect("pull");

        assert_eq!(products.latest().unwrap().len(), 2);
        let hits = search.latest().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p1");
    }

    #[test]
    fn test_orders_by_status_updates_on_cancel() {
        let store = test_store();
        let cancelled = store.watch_orders_by_status(OrderStatus::Cancelled);
        assert_eq!(cancelled.latest(), Some(Vec::new()));

        let order = sample_order();
        store.put_order(&order).expect("put");
        store.cancel_order(&order.id).expect("cancel");

        let seen = cancelled.latest().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, order.id);
    }

    #[test]
    fn test_last_sync_time_goes_live_on_advance() {
        let store = test_store();
        let last_sync = store.watch_last_sync_time();
        assert_eq!(last_sync.latest(), Some(None));

        let now = Utc::now();
        store.advance_last_sync_time(now).expect("advance");
        assert_eq!(last_sync.latest(), Some(Some(now)));
    }
}
