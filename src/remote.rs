//! Sync backend API client.
//!
//! Defines the contract the sync engine needs from the remote system of
//! record: idempotent upserts for terminal-authored records (safe to call
//! more than once with the same client id) and an incremental catalog
//! fetch. `HttpRemoteApi` implements it against the admin dashboard.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Order, Payment, Product};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Acknowledgement of an idempotent upsert. The server may issue its own
/// identifier for the record in addition to the client-generated one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertAck {
    pub server_id: Option<String>,
}

/// The remote contract the sync engine consumes. Implementations must
/// make upserts idempotent on the record's client-generated id.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn upsert_order(&self, token: &str, order: &Order) -> Result<UpsertAck>;

    async fn upsert_payment(&self, token: &str, payment: &Payment) -> Result<UpsertAck>;

    /// All products updated at or after `since`, including soft-deleted
    /// ones tagged inactive (so terminals can drop them locally).
    async fn fetch_catalog_since(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Product>>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the sync backend URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly network error.
fn friendly_error(url: &str, err: &reqwest::Error) -> Error {
    if err.is_connect() {
        return Error::Network(format!("cannot reach sync backend at {url}"));
    }
    if err.is_timeout() {
        return Error::Network(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return Error::Network(format!("invalid sync backend URL: {url}"));
    }
    Error::Network(format!("network error communicating with {url}: {err}"))
}

/// Classify a non-success HTTP response. Server-side errors are treated
/// as transient; everything else is a rejection of the upsert itself.
fn classify_status(status: StatusCode, body: &str) -> Error {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "no response body".to_string()
            } else {
                trimmed.to_string()
            }
        });

    if status.is_server_error() {
        Error::Network(format!("sync backend error (HTTP {}): {detail}", status.as_u16()))
    } else {
        Error::Conflict(format!(
            "sync backend rejected request (HTTP {}): {detail}",
            status.as_u16()
        ))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn parse_upsert_ack(value: &Value) -> UpsertAck {
    let server_id = value
        .get("serverId")
        .or_else(|| value.get("server_id"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    UpsertAck { server_id }
}

fn parse_catalog_payload(value: Value) -> Result<Vec<Product>> {
    let list = match value {
        Value::Object(mut obj) => obj
            .remove("products")
            .ok_or_else(|| Error::Network("catalog response missing `products`".into()))?,
        other => other,
    };
    serde_json::from_value(list)
        .map_err(|e| Error::Network(format!("invalid catalog payload from sync backend: {e}")))
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Admin-dashboard implementation of [`RemoteApi`].
pub struct HttpRemoteApi {
    client: Client,
    base_url: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(HttpRemoteApi {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    async fn post_json(&self, token: &str, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        Self::read_response(resp, &self.base_url).await
    }

    async fn read_response(resp: reqwest::Response, base_url: &str) -> Result<Value> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| friendly_error(base_url, &e))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::Network(format!("invalid JSON from sync backend: {e}")))
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn upsert_order(&self, token: &str, order: &Order) -> Result<UpsertAck> {
        let body = serde_json::to_value(order)?;
        let value = self.post_json(token, "/api/pos/orders/sync", &body).await?;
        debug!(order_id = %order.id, "Order upserted");
        Ok(parse_upsert_ack(&value))
    }

    async fn upsert_payment(&self, token: &str, payment: &Payment) -> Result<UpsertAck> {
        let body = serde_json::to_value(payment)?;
        let value = self
            .post_json(token, "/api/pos/payments/sync", &body)
            .await?;
        debug!(payment_id = %payment.id, "Payment upserted");
        Ok(parse_upsert_ack(&value))
    }

    async fn fetch_catalog_since(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Product>> {
        let url = format!("{}/api/pos/catalog/sync", self.base_url);
        let mut req = self.client.get(&url).bearer_auth(token);
        if let Some(since) = since {
            req = req.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let value = Self::read_response(resp, &self.base_url).await?;
        parse_catalog_payload(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("admin.example.com"),
            "https://admin.example.com"
        );
        assert_eq!(
            normalize_base_url("localhost:3000/"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_base_url("https://admin.example.com/api/"),
            "https://admin.example.com"
        );
        assert_eq!(
            normalize_base_url("  https://admin.example.com//  "),
            "https://admin.example.com"
        );
    }

    #[test]
    fn test_classify_status() {
        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.is_network());

        let err = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": "unknown product id"}"#,
        );
        assert!(err.is_conflict());
        assert!(err.to_string().contains("unknown product id"));

        let err = classify_status(StatusCode::UNAUTHORIZED, "nope");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("HTTP 401"));
    }

    #[test]
    fn test_parse_upsert_ack() {
        let ack = parse_upsert_ack(&json!({ "success": true, "serverId": "srv-7" }));
        assert_eq!(ack.server_id.as_deref(), Some("srv-7"));

        let ack = parse_upsert_ack(&json!({ "success": true, "server_id": " srv-8 " }));
        assert_eq!(ack.server_id.as_deref(), Some("srv-8"));

        let ack = parse_upsert_ack(&json!({ "success": true }));
        assert!(ack.server_id.is_none());

        let ack = parse_upsert_ack(&Value::Null);
        assert!(ack.server_id.is_none());
    }

    #[test]
    fn test_parse_catalog_payload_shapes() {
        let product = json!({
            "id": "p1",
            "name": "Espresso",
            "price": 2.5,
            "stockQuantity": 10,
            "isActive": true,
            "updatedAt": "2026-08-01T10:00:00Z"
        });

        let wrapped = parse_catalog_payload(json!({ "products": [product.clone()] })).unwrap();
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].id, "p1");
        assert_eq!(wrapped[0].stock_quantity, 10);

        let bare = parse_catalog_payload(json!([product])).unwrap();
        assert_eq!(bare.len(), 1);

        let missing = parse_catalog_payload(json!({ "items": [] }));
        assert!(missing.is_err());
    }
}
