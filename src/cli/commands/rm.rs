//! rm command - Delete one key
//!
//! Deleting a key that does not exist succeeds unless `--cas` is given.

use anyhow::Result;

use super::{load_config, open_environment, parse_key, runtime, store_key};
use crate::core::types::ModifyIndex;
use crate::engine::Context;
use crate::ui::output::{self, Verbosity};

/// Delete `key` from `env_name`.
pub fn rm(ctx: &Context, env_name: &str, key: &str, cas: Option<u64>) -> Result<()> {
    let config = load_config(ctx)?;
    let (env, store) = open_environment(&config, env_name)?;
    let path = parse_key(key)?;
    let remote_key = store_key(&env, &path)?;

    runtime()?.block_on(store.delete(&remote_key, cas.map(ModifyIndex::new)))?;
    tracing::info!(environment = %env.name, key = %path, "key deleted");

    if ctx.json {
        output::print_json(&serde_json::json!({
            "environment": env.name,
            "key": path.to_string(),
            "status": "deleted",
        }))?;
    } else {
        output::print(
            format!("Deleted {} from {}", path, env.name),
            Verbosity::from_flags(ctx.quiet, ctx.debug),
        );
    }
    Ok(())
}
