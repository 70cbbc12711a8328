//! engine
//!
//! Orchestrates the sync lifecycle: Load -> Diff -> Plan -> Execute -> Record.
//!
//! # Architecture
//!
//! 1. **Load**: read a [`Snapshot`] of each environment
//! 2. **Diff**: compare them key by key
//! 3. **Plan**: turn the differences and a [`SyncPolicy`] into a
//!    [`SyncPlan`], failing closed on unresolved conflicts
//! 4. **Execute**: apply each side's plan with per-key compare-and-swap
//! 5. **Record**: after a clean two-way sync, store the agreed state as
//!    the next baseline
//!
//! # Invariants
//!
//! - Diffing and planning never touch the store
//! - All mutations flow through the [`Executor`]
//! - Planning errors abort before any mutation
//! - Dry-run plans are never executed
//!
//! # Example
//!
//! ```ignore
//! use consulkv::engine::{run_sync, SyncOptions, SyncSide};
//!
//! let outcome = run_sync(
//!     SyncSide::new(&dev, dev_store.as_ref()),
//!     SyncSide::new(&prod, prod_store.as_ref()),
//!     &SyncOptions::new(policy),
//!     Some(&baselines),
//!     |plan| confirm(plan),
//! )
//! .await?;
//! ```

pub mod baseline;
pub mod diff;
pub mod exec;
pub mod plan;
pub mod snapshot;

pub use baseline::{BaselineError, BaselineStore};
pub use diff::{diff, Diff, DiffDirection, DiffEntry, DiffSummary};
pub use exec::{ExecuteError, ExecutionResult, Executor, OpOutcome, OpReport};
pub use plan::{
    ConflictPolicy, MutationOp, Plan, PlanError, PlanId, SyncDirection, SyncPlan, SyncPlanner,
    SyncPolicy,
};
pub use snapshot::{LoadError, Snapshot, SnapshotLoader};

use std::path::PathBuf;

use serde::Serialize;

use crate::core::path::KeyPath;
use crate::core::types::{Environment, ErrorKind};
use crate::kv::KvStore;

/// Execution context for commands.
///
/// Contains global settings derived from CLI flags that affect command behavior.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Explicit configuration file.
    pub config_path: Option<PathBuf>,
    /// Debug logging enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
    /// Emit JSON instead of tables.
    pub json: bool,
    /// Interactive mode enabled (prompts allowed).
    pub interactive: bool,
}

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Loading a snapshot failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Planning failed.
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    /// Execution was refused.
    #[error("execution failed: {0}")]
    Execute(#[from] ExecuteError),

    /// Reading or writing the baseline failed.
    #[error(transparent)]
    Baseline(#[from] BaselineError),
}

impl EngineError {
    /// The user-visible error kind, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Load(e) => Some(e.kind()),
            EngineError::Plan(e) => e.kind(),
            EngineError::Execute(e) => e.kind(),
            EngineError::Baseline(_) => None,
        }
    }
}

/// One environment and the store that holds it.
#[derive(Clone, Copy)]
pub struct SyncSide<'a> {
    /// The environment.
    pub env: &'a Environment,
    /// Its store.
    pub store: &'a dyn KvStore,
}

impl<'a> SyncSide<'a> {
    /// Pair an environment with its store.
    pub fn new(env: &'a Environment, store: &'a dyn KvStore) -> Self {
        Self { env, store }
    }

    async fn load(&self, concurrency: usize) -> Result<Snapshot, LoadError> {
        SnapshotLoader::new(self.store)
            .with_concurrency(concurrency)
            .with_timeout(self.env.connection.timeout)
            .load(self.env)
            .await
    }
}

/// Read both environments concurrently.
pub async fn load_pair(
    source: SyncSide<'_>,
    target: SyncSide<'_>,
    concurrency: usize,
) -> Result<(Snapshot, Snapshot), LoadError> {
    futures::try_join!(source.load(concurrency), target.load(concurrency))
}

/// Options for [`run_sync`].
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Planning policy.
    pub policy: SyncPolicy,
    /// Concurrent requests per snapshot load.
    pub concurrency: usize,
    /// Ignore any stored baseline (two-way only).
    pub reset_baseline: bool,
}

impl SyncOptions {
    /// Options with default concurrency and the stored baseline honored.
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            concurrency: SnapshotLoader::DEFAULT_CONCURRENCY,
            reset_baseline: false,
        }
    }
}

/// Results of executing both sides of a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Writes to the target environment.
    pub target: ExecutionResult,
    /// Writes to the source environment.
    pub source: ExecutionResult,
    /// Conflicts that the policy resolved.
    pub resolved_conflicts: Vec<KeyPath>,
    /// Whether a new baseline was recorded.
    pub baseline_updated: bool,
}

impl SyncReport {
    /// True iff both sides applied every op.
    pub fn is_success(&self) -> bool {
        self.target.is_success() && self.source.is_success()
    }
}

/// How a sync run ended.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Dry run: the plan that would have been executed.
    Planned(SyncPlan),
    /// The confirmation callback refused the plan.
    Declined(SyncPlan),
    /// The plan was executed.
    Executed(SyncReport),
}

/// Run a sync between two environments.
///
/// `confirm` is shown every non-empty, executable plan and decides
/// whether it runs. `baselines` enables baseline persistence for two-way
/// sync; without it two-way sync runs with no common ancestor.
///
/// # Errors
///
/// Fails before any write if either snapshot cannot be loaded, the
/// baseline cannot be read, or planning aborts on conflict. Per-op write
/// failures are reported in the [`SyncReport`], not as errors. If the
/// target becomes unreachable, the source plan is skipped whole.
pub async fn run_sync<F>(
    source: SyncSide<'_>,
    target: SyncSide<'_>,
    options: &SyncOptions,
    baselines: Option<&BaselineStore>,
    confirm: F,
) -> Result<SyncOutcome, EngineError>
where
    F: FnOnce(&SyncPlan) -> bool,
{
    let policy = options.policy;
    let two_way = policy.direction == SyncDirection::TwoWay;

    // 1. Load
    let (source_snap, target_snap) = load_pair(source, target, options.concurrency).await?;

    // 2-3. Diff and plan
    let baseline = match baselines {
        Some(store) if two_way && !options.reset_baseline => {
            store.load(&source.env.name, &target.env.name)?
        }
        _ => None,
    };
    if two_way && baseline.is_none() {
        tracing::info!(source = %source.env.name, target = %target.env.name, "no baseline; keys present on both sides with different values will conflict");
    }
    let plan = SyncPlanner::new(policy).plan(&source_snap, &target_snap, baseline.as_ref())?;
    tracing::info!(to_target = plan.to_target.len(), to_source = plan.to_source.len(), "sync planned");

    if plan.is_dry_run() {
        return Ok(SyncOutcome::Planned(plan));
    }
    if !plan.is_empty() && !confirm(&plan) {
        return Ok(SyncOutcome::Declined(plan));
    }

    // 4. Execute
    let SyncPlan {
        to_target,
        to_source,
        resolved_conflicts,
    } = plan;
    let target_result = Executor::new(target.store, target.env)
        .execute(to_target)
        .await?;
    let source_result = if target_result.halted() {
        tracing::warn!(
            source = %source.env.name,
            ops = to_source.len(),
            "target unavailable; not writing to source"
        );
        ExecutionResult::skipped(to_source, ErrorKind::BackendUnavailable)
    } else {
        Executor::new(source.store, source.env)
            .execute(to_source)
            .await?
    };

    let mut report = SyncReport {
        target: target_result,
        source: source_result,
        resolved_conflicts,
        baseline_updated: false,
    };

    // 5. Record
    if two_way && report.is_success() {
        if let Some(store) = baselines {
            report.baseline_updated = record_baseline(source, target, options, store).await?;
        }
    }

    Ok(SyncOutcome::Executed(report))
}

/// Re-read both sides and store the source as the baseline if they agree.
async fn record_baseline(
    source: SyncSide<'_>,
    target: SyncSide<'_>,
    options: &SyncOptions,
    store: &BaselineStore,
) -> Result<bool, EngineError> {
    let (source_snap, target_snap) = load_pair(source, target, options.concurrency).await?;
    if !source_snap.same_contents(&target_snap) {
        tracing::warn!(
            source = %source.env.name,
            target = %target.env.name,
            "environments changed during sync; baseline not updated"
        );
        return Ok(false);
    }
    store.save(&source.env.name, &target.env.name, &source_snap)?;
    Ok(true)
}
