//! consulkv - compare and synchronize Consul KV across environments
//!
//! An environment is a named prefix in a Consul cluster (`dev/`, `prod/`,
//! possibly on different clusters). consulkv reads a snapshot of each,
//! diffs them by path relative to their prefixes, plans the writes needed
//! to bring them in line, and applies those writes with per-key
//! compare-and-swap.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Load → Diff → Plan → Execute → Record lifecycle
//! - [`core`] - Key paths, domain types and configuration
//! - [`kv`] - The remote store trait, the Consul client and an in-memory mock
//! - [`ui`] - Tables, JSON output and prompts
//!
//! # Correctness Invariants
//!
//! 1. Diffing and planning are pure; only the executor writes
//! 2. Every write is conditional on the index read in the snapshot
//! 3. A plan that aborts on conflict writes nothing
//! 4. A dry-run plan is never executed

pub mod cli;
pub mod core;
pub mod engine;
pub mod kv;
pub mod ui;
