//! ls command - List keys and values in an environment

use anyhow::Result;
use tabled::Tabled;

use super::{load_config, open_environment, runtime};
use crate::core::path::KeyPath;
use crate::core::types::KeyEntry;
use crate::engine::{Context, SnapshotLoader};
use crate::ui::output::{self, display_value, Verbosity};

#[derive(Tabled)]
struct KeyRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "INDEX")]
    index: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

impl From<&KeyEntry> for KeyRow {
    fn from(entry: &KeyEntry) -> Self {
        Self {
            key: entry.path.to_string(),
            index: entry.modify_index.to_string(),
            value: display_value(&entry.value),
        }
    }
}

/// List keys and values, optionally only those under `prefix`.
pub fn ls(ctx: &Context, env_name: &str, prefix: Option<&str>) -> Result<()> {
    let config = load_config(ctx)?;
    let (env, store) = open_environment(&config, env_name)?;
    let prefix = match prefix {
        Some(p) => KeyPath::parse(p)?,
        None => KeyPath::root(),
    };

    let snapshot = runtime()?.block_on(
        SnapshotLoader::new(store.as_ref())
            .with_timeout(env.connection.timeout)
            .load(&env),
    )?;
    let entries: Vec<_> = snapshot.under(&prefix).collect();

    if ctx.json {
        output::print_json(&entries)?;
        return Ok(());
    }

    if ctx.quiet {
        for entry in &entries {
            println!("{}", entry.path);
        }
        return Ok(());
    }

    let verbosity = Verbosity::from_flags(ctx.quiet, ctx.debug);
    if entries.is_empty() {
        output::print(format!("No keys in {}", env.name), verbosity);
        return Ok(());
    }
    let rows = entries.iter().map(|entry| KeyRow::from(*entry));
    output::print(output::table(rows), verbosity);
    Ok(())
}
