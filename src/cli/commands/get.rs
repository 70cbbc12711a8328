//! get command - Print one value
//!
//! The value is written to stdout as raw bytes, without a trailing
//! newline, so `consulkv get prod app/cert > cert.pem` round-trips.

use std::io::Write;

use anyhow::{bail, Result};
use serde::Serialize;

use super::{load_config, open_environment, parse_key, runtime, store_key};
use crate::core::types::{base64_bytes, ModifyIndex};
use crate::engine::Context;
use crate::ui::output;

#[derive(Debug, Serialize)]
struct GetOutput<'a> {
    environment: &'a str,
    key: String,
    #[serde(with = "base64_bytes")]
    value: Vec<u8>,
    modify_index: ModifyIndex,
}

/// Print the value stored at `key` in `env_name`.
pub fn get(ctx: &Context, env_name: &str, key: &str) -> Result<()> {
    let config = load_config(ctx)?;
    let (env, store) = open_environment(&config, env_name)?;
    let path = parse_key(key)?;
    let remote_key = store_key(&env, &path)?;

    let entry = runtime()?.block_on(store.get(&remote_key))?;
    let Some(entry) = entry else {
        bail!("key '{}' not found in environment '{}'", path, env.name);
    };

    if ctx.json {
        output::print_json(&GetOutput {
            environment: &env.name,
            key: path.to_string(),
            value: entry.value,
            modify_index: entry.modify_index,
        })?;
        return Ok(());
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&entry.value)?;
    stdout.flush()?;
    Ok(())
}
