//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`ErrorKind`] - User-visible error classification
//! - [`ModifyIndex`] - Store version index used for compare-and-swap
//! - [`KeyEntry`] - A key, its value bytes and metadata
//! - [`Environment`] - A named prefix in a particular Consul cluster
//! - [`Connection`] - How to reach that cluster

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::path::KeyPath;

/// Classification of every failure the tool reports.
///
/// Run summaries and exit status are expressed in terms of these kinds so
/// scripts can match on them without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A key path was malformed.
    InvalidPath,
    /// A key was found outside the prefix it was read from.
    NotUnderBase,
    /// The store could not be reached, or a call timed out.
    BackendUnavailable,
    /// The store refused the credentials.
    PermissionDenied,
    /// Planning found keys changed on both sides.
    SyncConflict,
    /// An attempt was made to execute a dry-run plan.
    DryRunPlan,
    /// A key changed after it was read.
    ConcurrentModification,
    /// The store refused a request for another reason (bad request,
    /// value too large).
    Rejected,
}

impl ErrorKind {
    /// Stable identifier used in output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::NotUnderBase => "not_under_base",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::SyncConflict => "sync_conflict",
            ErrorKind::DryRunPlan => "dry_run_plan",
            ErrorKind::ConcurrentModification => "concurrent_modification",
            ErrorKind::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store modify index.
///
/// Consul bumps a key's modify index on every write. Writing with an
/// expected index succeeds only if the key still carries it;
/// [`ModifyIndex::ABSENT`] means the key must not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifyIndex(u64);

impl ModifyIndex {
    /// Expected index for a key that must not exist.
    pub const ABSENT: ModifyIndex = ModifyIndex(0);

    /// Wrap a raw index.
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this expects the key to be absent.
    pub fn is_absent(self) -> bool {
        self == Self::ABSENT
    }
}

impl fmt::Display for ModifyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ModifyIndex {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

/// One key as read from an environment.
///
/// `path` is relative to the environment's prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Path relative to the environment root.
    pub path: KeyPath,
    /// Raw value bytes.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Index of the last write to this key.
    pub modify_index: ModifyIndex,
    /// Opaque Consul flags.
    #[serde(default)]
    pub flags: u64,
}

impl KeyEntry {
    /// Create an entry.
    pub fn new(path: KeyPath, value: impl Into<Vec<u8>>, modify_index: ModifyIndex) -> Self {
        Self {
            path,
            value: value.into(),
            modify_index,
            flags: 0,
        }
    }

    /// The value as text, replacing invalid UTF-8.
    pub fn value_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Connection parameters for one Consul cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct Connection {
    /// Base HTTP address, e.g. `http://127.0.0.1:8500`.
    pub address: String,
    /// ACL token sent as `X-Consul-Token`.
    pub token: Option<String>,
    /// Datacenter to address, if not the agent's own.
    pub datacenter: Option<String>,
    /// Upper bound for every remote call.
    pub timeout: Duration,
}

impl Connection {
    /// Default agent address.
    pub const DEFAULT_ADDRESS: &'static str = "http://127.0.0.1:8500";

    /// Default per-call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            address: Self::DEFAULT_ADDRESS.to_string(),
            token: None,
            datacenter: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

// Keeps the token out of debug logs.
impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("has_token", &self.token.is_some())
            .field("datacenter", &self.datacenter)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A named environment: a prefix in a Consul cluster.
///
/// Built from validated configuration and immutable for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Logical name (e.g. `staging`).
    pub name: String,
    /// Prefix under which every key of this environment lives.
    pub prefix: KeyPath,
    /// How to reach the cluster.
    pub connection: Connection,
}

impl Environment {
    /// Create an environment with default connection parameters.
    pub fn new(name: impl Into<String>, prefix: KeyPath) -> Self {
        Self {
            name: name.into(),
            prefix,
            connection: Connection::default(),
        }
    }

    /// Replace the connection parameters (builder pattern).
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connection = connection;
        self
    }

    /// Absolute store key for an environment-relative path.
    pub fn absolute(&self, relative: &KeyPath) -> KeyPath {
        self.prefix.join(relative)
    }
}

/// Serde adapter storing bytes as standard base64 text.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    /// Deserialize base64 text into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
