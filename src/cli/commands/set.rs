//! set command - Write one value

use anyhow::Result;

use super::{load_config, open_environment, parse_key, runtime, store_key};
use crate::core::types::ModifyIndex;
use crate::engine::Context;
use crate::ui::output::{self, Verbosity};

/// Write `value` at `key`, guarded by `cas` when given.
pub fn set(ctx: &Context, env_name: &str, key: &str, value: &str, cas: Option<u64>) -> Result<()> {
    let config = load_config(ctx)?;
    let (env, store) = open_environment(&config, env_name)?;
    let path = parse_key(key)?;
    let remote_key = store_key(&env, &path)?;

    runtime()?.block_on(store.put(&remote_key, value.as_bytes(), cas.map(ModifyIndex::new)))?;
    tracing::info!(environment = %env.name, key = %path, "value written");

    if ctx.json {
        output::print_json(&serde_json::json!({
            "environment": env.name,
            "key": path.to_string(),
            "status": "applied",
        }))?;
    } else {
        output::print(
            format!("Set {} in {}", path, env.name),
            Verbosity::from_flags(ctx.quiet, ctx.debug),
        );
    }
    Ok(())
}
