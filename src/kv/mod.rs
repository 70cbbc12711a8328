//! kv
//!
//! Abstraction over the remote key/value store.
//!
//! # Architecture
//!
//! The [`KvStore`] trait is the only way the engine touches the network.
//! Commands obtain a store through [`create_store`] rather than naming
//! [`consul::ConsulKv`] directly, so tests can substitute [`mock::MockKv`].
//!
//! # Modules
//!
//! - `traits`: The `KvStore` trait and wire-level types
//! - [`consul`]: Consul HTTP API implementation
//! - [`mock`]: In-memory implementation for deterministic testing
//!
//! # Example
//!
//! ```ignore
//! use consulkv::kv::create_store;
//!
//! let store = create_store(&env)?;
//! let keys = store.list_keys("prod/", Some('/')).await?;
//! ```

pub mod consul;
pub mod mock;
mod traits;

pub use traits::*;

use crate::core::types::Environment;

/// Create the store for an environment.
///
/// # Errors
///
/// Returns an error if the environment's address cannot be used.
pub fn create_store(env: &Environment) -> Result<Box<dyn KvStore>, KvError> {
    tracing::debug!(environment = %env.name, address = %env.connection.address, "creating store");
    Ok(Box::new(consul::ConsulKv::new(&env.connection)?))
}
