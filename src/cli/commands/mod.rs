//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Validates command-specific arguments
//! 2. Calls the engine to execute the command
//! 3. Formats and displays output
//!
//! Handlers do NOT build sync mutations themselves; `sync` goes through
//! [`crate::engine::run_sync`].
//!
//! # Async Commands
//!
//! Every command except `envs` and `completion` talks to Consul and is
//! async underneath. Each one creates a tokio runtime and blocks on its
//! async implementation.

mod completion;
mod diff;
mod envs;
mod get;
mod ls;
mod rm;
mod set;
mod sync;

// Re-export command functions for testing and direct invocation
pub use completion::completion;
pub use diff::diff;
pub use envs::envs;
pub use get::get;
pub use ls::ls;
pub use rm::rm;
pub use set::set;
pub use sync::sync;

use anyhow::{bail, Context as _, Result};

use crate::cli::args::Command;
use crate::core::config::Config;
use crate::core::path::KeyPath;
use crate::core::types::Environment;
use crate::engine::Context;
use crate::kv::{create_store, KvStore};

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Envs => envs::envs(ctx),
        Command::Ls { env, prefix } => ls::ls(ctx, &env, prefix.as_deref()),
        Command::Get { env, key } => get::get(ctx, &env, &key),
        Command::Set {
            env,
            key,
            value,
            cas,
        } => set::set(ctx, &env, &key, &value, cas),
        Command::Rm { env, key, cas } => rm::rm(ctx, &env, &key, cas),
        Command::Diff {
            source,
            target,
            direction,
            all,
        } => diff::diff(ctx, &source, &target, direction.into(), all),
        Command::Sync {
            source,
            target,
            direction,
            on_conflict,
            dry_run,
            prune,
            yes,
            reset_baseline,
            concurrency,
        } => sync::sync(
            ctx,
            sync::SyncArgs {
                source,
                target,
                direction: direction.into(),
                on_conflict: on_conflict.into(),
                dry_run,
                prune,
                yes,
                reset_baseline,
                concurrency,
            },
        ),
        Command::Completion { shell } => completion::completion(shell),
    }
}

/// Load the configuration named by the global flags.
fn load_config(ctx: &Context) -> Result<Config> {
    Config::load(ctx.config_path.as_deref()).context("failed to load configuration")
}

/// Look up an environment and create its store.
fn open_environment(config: &Config, name: &str) -> Result<(Environment, Box<dyn KvStore>)> {
    let env = config.environment(name)?.clone();
    let store = create_store(&env)
        .with_context(|| format!("failed to connect to environment '{}'", name))?;
    Ok((env, store))
}

/// Create the runtime for one command.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}

/// Parse a user-supplied key (relative to an environment).
fn parse_key(key: &str) -> Result<KeyPath> {
    let path = KeyPath::parse(key)?;
    if path.is_root() {
        bail!("key cannot be empty");
    }
    Ok(path)
}

/// The store key for `key` in `env`.
fn store_key(env: &Environment, key: &KeyPath) -> Result<String> {
    Ok(env.absolute(key).to_store_key()?)
}
