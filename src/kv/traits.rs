//! kv::traits
//!
//! The remote key/value store interface.
//!
//! # Design
//!
//! `KvStore` is async because every call is network I/O. Keys are the
//! store's raw key strings; translating between environment-relative
//! [`KeyPath`](crate::core::KeyPath)s and store keys is the caller's job.
//!
//! Prefix semantics are plain string prefixes, as in Consul:
//! `list_under("app")` also returns `application/x`. Callers that want a
//! subtree pass a prefix ending in `/`.
//!
//! Writes take an optional expected [`ModifyIndex`]:
//! - `None` writes unconditionally
//! - `Some(ModifyIndex::ABSENT)` succeeds only if the key does not exist
//! - `Some(i)` succeeds only if the key's modify index is still `i`
//!
//! A failed precondition is reported as [`KvError::CasMismatch`].

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{ErrorKind, ModifyIndex};

/// Errors from store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    /// Transport failure, timeout, or the store reported itself unhealthy.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The token is missing, invalid or lacks the needed ACL.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A compare-and-swap precondition did not hold.
    #[error("key '{key}' was modified concurrently")]
    CasMismatch {
        /// The key that failed the check.
        key: String,
    },

    /// The store rejected the request.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the store
        message: String,
    },

    /// The store answered with something unparseable.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl KvError {
    /// The user-visible error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KvError::Unavailable(_) => ErrorKind::BackendUnavailable,
            KvError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            KvError::CasMismatch { .. } => ErrorKind::ConcurrentModification,
            KvError::ApiError { .. } | KvError::InvalidResponse(_) => ErrorKind::Rejected,
        }
    }

    /// Whether the store itself is unreachable, as opposed to refusing one
    /// request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KvError::Unavailable(_))
    }
}

/// A key as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Full store key.
    pub key: String,
    /// Value bytes (empty for folder markers).
    pub value: Vec<u8>,
    /// Index of the last write.
    pub modify_index: ModifyIndex,
    /// Opaque flags.
    pub flags: u64,
}

/// Result of a recursive listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Entries, in store order.
    pub entries: Vec<RemoteEntry>,
    /// The store's index at the time of the read.
    pub index: ModifyIndex,
}

/// A remote hierarchical key/value store.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the snapshot loader issues
/// concurrent reads through a shared reference.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store implementation name (e.g. "consul", "mock").
    fn name(&self) -> &'static str;

    /// Every key starting with `prefix`, with values.
    ///
    /// An empty result is `Ok` with no entries, never an error.
    async fn list_under(&self, prefix: &str) -> Result<Listing, KvError>;

    /// Key names starting with `prefix`.
    ///
    /// With a separator, keys are collapsed at the first separator after
    /// the prefix, so `list_keys("app/", Some('/'))` over `app/db/host` and
    /// `app/port` yields `app/db/` and `app/port`.
    async fn list_keys(&self, prefix: &str, separator: Option<char>)
        -> Result<Vec<String>, KvError>;

    /// One key, or `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, KvError>;

    /// Write a value, optionally guarded by an expected index.
    ///
    /// # Errors
    ///
    /// - `CasMismatch` if `expected` does not match the key's current state
    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected: Option<ModifyIndex>,
    ) -> Result<(), KvError>;

    /// Delete a key, optionally guarded by an expected index.
    ///
    /// Deleting a missing key succeeds, with or without a guard.
    ///
    /// # Errors
    ///
    /// - `CasMismatch` if `expected` does not match the key's current state
    async fn delete(&self, key: &str, expected: Option<ModifyIndex>) -> Result<(), KvError>;
}
