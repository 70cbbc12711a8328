//! cli::commands::sync
//!
//! Synchronize two environments.
//!
//! # Flow
//!
//! 1. Resolve both environments and create their stores
//! 2. Hand off to [`engine::run_sync`], which loads, plans and executes
//! 3. Before anything is written, show the plan and ask for confirmation
//!    (skipped with `--yes`)
//! 4. Print the per-key summary
//!
//! Two-way syncs read and record a baseline in the state directory; one-way
//! syncs never touch it.
//!
//! # Exit status
//!
//! The command fails when the plan aborts on conflict, when the user
//! declines, and when any op failed or was skipped.
//!
//! # Example
//!
//! ```bash
//! # Preview
//! consulkv sync --source staging --target prod --dry-run
//!
//! # Apply without prompting
//! consulkv sync --source staging --target prod --yes
//! ```

use anyhow::{bail, Context as _, Result};

use super::{load_config, open_environment, runtime};
use crate::engine::{
    self, BaselineStore, ConflictPolicy, Context, SyncDirection, SyncOutcome, SyncOptions,
    SyncPlan, SyncPolicy, SyncSide,
};
use crate::ui::output::{self, Verbosity};
use crate::ui::prompts::{self, PromptError};

/// Sync command arguments.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Source environment name.
    pub source: String,
    /// Target environment name.
    pub target: String,
    /// Which way changes flow.
    pub direction: SyncDirection,
    /// Whose value prevails on conflict.
    pub on_conflict: ConflictPolicy,
    /// Plan only.
    pub dry_run: bool,
    /// Delete extra keys on the receiving side (one-way).
    pub prune: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
    /// Ignore the stored two-way baseline.
    pub reset_baseline: bool,
    /// Concurrent reads per environment.
    pub concurrency: usize,
}

impl SyncArgs {
    fn options(&self) -> SyncOptions {
        let policy = SyncPolicy {
            direction: self.direction,
            on_conflict: self.on_conflict,
            dry_run: self.dry_run,
            prune: self.prune,
        };
        SyncOptions {
            concurrency: self.concurrency.max(1),
            reset_baseline: self.reset_baseline,
            ..SyncOptions::new(policy)
        }
    }
}

/// Synchronize two environments.
pub fn sync(ctx: &Context, args: SyncArgs) -> Result<()> {
    if args.source == args.target {
        bail!("source and target are the same environment '{}'", args.source);
    }
    if args.prune && args.direction == SyncDirection::TwoWay {
        bail!("--prune only applies to one-way syncs; two-way syncs propagate deletes on their own");
    }

    let config = load_config(ctx)?;
    let (source_env, source_store) = open_environment(&config, &args.source)?;
    let (target_env, target_store) = open_environment(&config, &args.target)?;

    let baselines = if args.direction == SyncDirection::TwoWay {
        Some(BaselineStore::default_location().context("cannot locate the state directory")?)
    } else {
        None
    };

    let verbosity = Verbosity::from_flags(ctx.quiet, ctx.debug);
    let options = args.options();
    let confirm = |plan: &SyncPlan| confirm_plan(ctx, plan, args.yes, verbosity);

    let outcome = runtime()?.block_on(engine::run_sync(
        SyncSide::new(&source_env, source_store.as_ref()),
        SyncSide::new(&target_env, target_store.as_ref()),
        &options,
        baselines.as_ref(),
        confirm,
    ))?;

    match outcome {
        SyncOutcome::Planned(plan) => {
            if ctx.json {
                output::print_json(&plan)?;
            } else {
                output::print(format_plan(&plan), verbosity);
            }
            Ok(())
        }
        SyncOutcome::Declined(plan) => {
            if ctx.json {
                output::print_json(&plan)?;
            }
            bail!("sync not applied; nothing was written");
        }
        SyncOutcome::Executed(report) => {
            if ctx.json {
                output::print_json(&report)?;
            } else {
                output::print(output::format_sync_report(&report), verbosity);
            }
            if !report.is_success() {
                let failed = report.target.failed + report.source.failed;
                let skipped = report.target.skipped + report.source.skipped;
                bail!("sync incomplete: {} failed, {} skipped", failed, skipped);
            }
            Ok(())
        }
    }
}

/// Decide whether an executable plan runs.
fn confirm_plan(ctx: &Context, plan: &SyncPlan, yes: bool, verbosity: Verbosity) -> bool {
    if yes {
        return true;
    }
    eprintln!("{}", format_plan(plan));
    match prompts::confirm("Apply these changes?", false, ctx.interactive) {
        Ok(answer) => answer,
        Err(PromptError::NotInteractive) => {
            output::warn("not running interactively; pass --yes to apply", verbosity);
            false
        }
        Err(e) => {
            output::warn(format!("confirmation failed: {}", e), verbosity);
            false
        }
    }
}

/// Both plans and any conflicts the policy settled.
fn format_plan(plan: &SyncPlan) -> String {
    if plan.is_empty() {
        return "Already in sync".to_string();
    }
    let mut lines: Vec<String> = plan
        .plans()
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.preview())
        .collect();
    if !plan.resolved_conflicts.is_empty() {
        lines.push(format!(
            "Conflicts resolved by policy:\n{}",
            output::format_list(&plan.resolved_conflicts, "  ")
        ));
    }
    lines.join("\n")
}
