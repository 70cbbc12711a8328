//! core
//!
//! Core domain types and configuration for consulkv.
//!
//! # Modules
//!
//! - [`path`] - Canonical hierarchical key paths
//! - [`types`] - Strong types: ModifyIndex, KeyEntry, Environment, ErrorKind
//! - [`config`] - Configuration schema, loading and environment resolution
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at construction time
//! - Configuration is validated once, at load
//! - Everything here is pure; no module performs network I/O

pub mod config;
pub mod path;
pub mod types;

pub use path::{KeyPath, PathError};
pub use types::{Connection, Environment, ErrorKind, KeyEntry, ModifyIndex};
