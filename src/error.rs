//! Error taxonomy for the sync engine.
//!
//! Local-write failures (`Validation`, `Transaction`) surface synchronously
//! to the caller; remote failures (`Network`, `Conflict`) are absorbed
//! per-item by the sync cycle and only show up as failed/pending counts.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A record was malformed on local write. Rejected before anything
    /// is persisted.
    #[error("validation: {0}")]
    Validation(String),

    /// A scoped multi-write failed in the transaction machinery itself
    /// (begin/commit, or a poisoned connection lock). All member writes
    /// were rolled back.
    #[error("transaction: {0}")]
    Transaction(String),

    /// A remote call failed in transit (connect, timeout, 5xx). The
    /// affected item is marked failed and retried on a later cycle.
    #[error("network: {0}")]
    Network(String),

    /// The remote rejected an idempotent upsert for a non-transient
    /// reason (4xx). Handled like a network failure, classified apart.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors the sync cycle treats as transient transport
    /// failures.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// True for remote rejections that are not transport failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifiers() {
        assert!(Error::Network("timed out".into()).is_network());
        assert!(!Error::Network("timed out".into()).is_conflict());
        assert!(Error::Conflict("HTTP 422".into()).is_conflict());
        assert!(!Error::Validation("bad".into()).is_network());
    }

    #[test]
    fn test_display_prefixes() {
        let e = Error::Validation("total mismatch".into());
        assert_eq!(e.to_string(), "validation: total mismatch");
        let e = Error::Transaction("rolled back".into());
        assert!(e.to_string().starts_with("transaction:"));
    }
}
