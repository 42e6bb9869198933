//! Record types held by the local store.
//!
//! Orders and payments are authored on the terminal (client-generated
//! UUIDs, financial fields computed at write time and never recomputed by
//! the engine). Products are a cached projection of the server catalog and
//! are only ever written by the pull phase.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Tolerance when comparing money fields stored as REAL (half a cent).
const MONEY_EPSILON: f64 = 0.005;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Synchronization state of a locally authored record.
///
/// `Syncing` is transient: rows left in it by a crash are normalised back
/// to `Pending` when the database is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(OrderStatus::Draft),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Payment method accepted at the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Other,
}

impl PaymentMethod {
    pub fn as_db(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Other => "other",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            "other" => Some(PaymentMethod::Other),
            _ => None,
        }
    }
}

/// Lifecycle state of a payment. Voiding is the payment soft delete:
/// the row stays in place so its sync queue position is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Completed,
    Voided,
}

impl PaymentStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Voided => "voided",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(PaymentStatus::Completed),
            "voided" => Some(PaymentStatus::Voided),
            _ => None,
        }
    }
}

macro_rules! impl_sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_db()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                <$ty>::from_db(text).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {} value: {text}", stringify!($ty)).into())
                })
            }
        }
    };
}

impl_sql_text_enum!(SyncStatus);
impl_sql_text_enum!(OrderStatus);
impl_sql_text_enum!(PaymentMethod);
impl_sql_text_enum!(PaymentStatus);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Cached catalog product. Server-assigned id; overwritten wholesale by
/// each successful pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    /// May go negative between a local sale and the next reconciliation.
    pub stock_quantity: i64,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("product id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "product {}: name must not be empty",
                self.id
            )));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::Validation(format!(
                "product {}: price must be a non-negative number",
                self.id
            )));
        }
        Ok(())
    }
}

/// One order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price: f64,
}

/// A terminal-authored order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Client-generated UUID, stable across sync.
    pub id: String,
    pub line_items: Vec<LineItem>,
    pub status: OrderStatus,
    pub subtotal: f64,
    pub tax: f64,
    /// Computed at write time; the engine never recomputes it.
    pub total: f64,
    pub sync_status: SyncStatus,
    /// Server-confirmed identifier, attached by the push phase if the
    /// server issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new draft order with a fresh client id.
    pub fn new(line_items: Vec<LineItem>, subtotal: f64, tax: f64, total: f64) -> Self {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4().to_string(),
            line_items,
            status: OrderStatus::Draft,
            subtotal,
            tax,
            total,
            sync_status: SyncStatus::Pending,
            server_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("order id must not be empty".into()));
        }
        for (i, item) in self.line_items.iter().enumerate() {
            if item.product_id.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "order {}: line {i}: productId must not be empty",
                    self.id
                )));
            }
            if item.quantity <= 0 {
                return Err(Error::Validation(format!(
                    "order {}: line {i}: quantity must be positive",
                    self.id
                )));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(Error::Validation(format!(
                    "order {}: line {i}: unitPrice must be a non-negative number",
                    self.id
                )));
            }
        }
        if self.status == OrderStatus::Completed && self.line_items.is_empty() {
            return Err(Error::Validation(format!(
                "order {}: a completed order needs at least one line item",
                self.id
            )));
        }
        for (label, value) in [
            ("subtotal", self.subtotal),
            ("tax", self.tax),
            ("total", self.total),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "order {}: {label} must be a non-negative number",
                    self.id
                )));
            }
        }
        if (self.total - (self.subtotal + self.tax)).abs() > MONEY_EPSILON {
            return Err(Error::Validation(format!(
                "order {}: total {} does not equal subtotal {} + tax {}",
                self.id, self.total, self.subtotal, self.tax
            )));
        }
        Ok(())
    }
}

/// A terminal-authored payment against a local order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub amount: f64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: impl Into<String>, amount: f64, method: PaymentMethod) -> Self {
        Payment {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.into(),
            amount,
            method,
            status: PaymentStatus::Completed,
            sync_status: SyncStatus::Pending,
            server_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("payment id must not be empty".into()));
        }
        if self.order_id.trim().is_empty() {
            return Err(Error::Validation(format!(
                "payment {}: orderId must not be empty",
                self.id
            )));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::Validation(format!(
                "payment {}: amount must be positive",
                self.id
            )));
        }
        Ok(())
    }
}

/// Singleton sync bookkeeping record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Generated once when the database is first created; immutable.
    pub device_id: String,
    /// Absent until the first completed sync cycle; monotonically
    /// non-decreasing afterwards.
    pub last_sync_time: Option<DateTime<Utc>>,
}
