//! diff command - Show differences between two environments
//!
//! Read-only. Prints a table of differences followed by a one-line
//! summary, or a JSON document under `--json`. Differences alone do not
//! make the command fail.

use anyhow::Result;
use serde::Serialize;

use super::{load_config, open_environment, runtime};
use crate::engine::{self, Context, DiffDirection, DiffEntry, DiffSummary, SyncSide};
use crate::ui::output::{self, Verbosity};

#[derive(Debug, Serialize)]
struct DiffOutput<'a> {
    source: &'a str,
    target: &'a str,
    direction: DiffDirection,
    summary: DiffSummary,
    entries: Vec<DiffEntry<'a>>,
}

/// Compare `source` and `target`.
pub fn diff(
    ctx: &Context,
    source: &str,
    target: &str,
    direction: DiffDirection,
    all: bool,
) -> Result<()> {
    let config = load_config(ctx)?;
    let (source_env, source_store) = open_environment(&config, source)?;
    let (target_env, target_store) = open_environment(&config, target)?;

    let (source_snap, target_snap) = runtime()?.block_on(engine::load_pair(
        SyncSide::new(&source_env, source_store.as_ref()),
        SyncSide::new(&target_env, target_store.as_ref()),
        engine::SnapshotLoader::DEFAULT_CONCURRENCY,
    ))?;

    let entries = engine::diff(&source_snap, &target_snap, direction);
    let summary = DiffSummary::from_entries(entries.clone());
    let shown: Vec<DiffEntry<'_>> = entries.filter(|e| all || e.is_difference()).collect();

    if ctx.json {
        output::print_json(&DiffOutput {
            source: &source_env.name,
            target: &target_env.name,
            direction,
            summary,
            entries: shown,
        })?;
        return Ok(());
    }

    let verbosity = Verbosity::from_flags(ctx.quiet, ctx.debug);
    if summary.is_identical() && !all {
        output::print(
            format!("{} and {} are identical", source_env.name, target_env.name),
            verbosity,
        );
        return Ok(());
    }
    if !shown.is_empty() {
        output::print(output::diff_table(shown), verbosity);
        output::print("", verbosity);
    }
    output::print(output::format_diff_summary(&summary), verbosity);
    Ok(())
}
