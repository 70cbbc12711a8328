//! engine::exec
//!
//! The plan executor.
//!
//! # Architecture
//!
//! The executor is the only component that mutates the store during a
//! sync. It applies a [`Plan`]'s ops in order, each guarded by the modify
//! index the planner read, and records one [`OpOutcome`] per op.
//!
//! # Executor Contract
//!
//! - A dry-run plan is refused with `DryRunPlan` before any remote call
//! - A plan for another environment is refused with `InvalidPlan`
//! - An index mismatch or permission failure fails that op only
//! - A transport failure or timeout fails that op, skips every remaining
//!   op and stops
//! - Applied ops are never rolled back; a partially applied plan is
//!   reported as such
//!
//! # Example
//!
//! ```ignore
//! use consulkv::engine::exec::Executor;
//!
//! let result = Executor::new(store.as_ref(), &env).execute(plan).await?;
//! if !result.is_success() {
//!     for report in result.problems() {
//!         eprintln!("{}: {}", report.op.path(), report.outcome);
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::plan::{MutationOp, Plan, PlanId};
use super::snapshot::with_timeout;
use crate::core::types::{Environment, ErrorKind};
use crate::kv::{KvError, KvStore};

/// Errors that prevent a plan from running at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecuteError {
    /// The plan was built as a dry run.
    #[error("plan {0} is a dry run and cannot be executed")]
    DryRunPlan(PlanId),

    /// Plan is invalid.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
}

impl ExecuteError {
    /// The user-visible error kind, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ExecuteError::DryRunPlan(_) => Some(ErrorKind::DryRunPlan),
            ExecuteError::InvalidPlan(_) => None,
        }
    }
}

/// What happened to one op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum OpOutcome {
    /// The store accepted the write.
    Applied,
    /// Not attempted because an earlier op lost the store.
    Skipped(ErrorKind),
    /// Attempted and refused.
    Failed(ErrorKind),
}

impl OpOutcome {
    /// Whether the op took effect.
    pub fn is_applied(&self) -> bool {
        matches!(self, OpOutcome::Applied)
    }
}

impl fmt::Display for OpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpOutcome::Applied => f.write_str("applied"),
            OpOutcome::Skipped(kind) => write!(f, "skipped ({})", kind),
            OpOutcome::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// One op and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpReport {
    /// The op.
    pub op: MutationOp,
    /// What happened.
    #[serde(flatten)]
    pub outcome: OpOutcome,
    /// Store message for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The result of executing one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Plan that was executed.
    pub plan_id: PlanId,
    /// Environment written to.
    pub environment: String,
    /// Ops applied.
    pub applied: usize,
    /// Ops that failed.
    pub failed: usize,
    /// Ops not attempted.
    pub skipped: usize,
    /// Every op in plan order.
    pub reports: Vec<OpReport>,
}

impl ExecutionResult {
    fn new(plan_id: PlanId, environment: String) -> Self {
        Self {
            plan_id,
            environment,
            applied: 0,
            failed: 0,
            skipped: 0,
            reports: Vec::new(),
        }
    }

    /// A result marking every op of `plan` as skipped, without running it.
    pub fn skipped(plan: Plan, kind: ErrorKind) -> Self {
        let mut result = Self::new(plan.id.clone(), plan.environment.clone());
        for op in plan.into_ops() {
            result.record(op, OpOutcome::Skipped(kind), None);
        }
        result
    }

    fn record(&mut self, op: MutationOp, outcome: OpOutcome, message: Option<String>) {
        match outcome {
            OpOutcome::Applied => self.applied += 1,
            OpOutcome::Skipped(_) => self.skipped += 1,
            OpOutcome::Failed(_) => self.failed += 1,
        }
        self.reports.push(OpReport {
            op,
            outcome,
            message,
        });
    }

    /// True iff nothing failed and nothing was skipped.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Whether execution stopped because the store became unreachable.
    pub fn halted(&self) -> bool {
        self.reports.iter().any(|r| {
            matches!(
                r.outcome,
                OpOutcome::Failed(ErrorKind::BackendUnavailable)
                    | OpOutcome::Skipped(ErrorKind::BackendUnavailable)
            )
        })
    }

    /// Reports for ops that did not apply.
    pub fn problems(&self) -> impl Iterator<Item = &OpReport> {
        self.reports.iter().filter(|r| !r.outcome.is_applied())
    }
}

/// Applies plans to one environment's store.
pub struct Executor<'a> {
    store: &'a dyn KvStore,
    environment: &'a Environment,
    timeout: Duration,
}

impl<'a> Executor<'a> {
    /// Create an executor for `environment`, writing through `store`.
    pub fn new(store: &'a dyn KvStore, environment: &'a Environment) -> Self {
        Self {
            store,
            environment,
            timeout: environment.connection.timeout,
        }
    }

    /// Override the per-op time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `plan`, consuming it.
    ///
    /// # Errors
    ///
    /// - `DryRunPlan` if the plan is tagged dry-run
    /// - `InvalidPlan` if the plan targets another environment
    ///
    /// Per-op failures are not errors; they are recorded in the result.
    pub async fn execute(&self, plan: Plan) -> Result<ExecutionResult, ExecuteError> {
        if plan.dry_run {
            return Err(ExecuteError::DryRunPlan(plan.id));
        }
        if plan.environment != self.environment.name {
            return Err(ExecuteError::InvalidPlan(format!(
                "plan is for environment '{}' but executor writes to '{}'",
                plan.environment, self.environment.name
            )));
        }

        let mut result = ExecutionResult::new(plan.id.clone(), plan.environment.clone());
        tracing::debug!(plan = %plan.id, environment = %plan.environment, ops = plan.len(), "executing plan");

        let mut ops = plan.into_ops().into_iter();
        while let Some(op) = ops.next() {
            match self.apply(&op).await {
                Ok(()) => {
                    tracing::debug!(op = %op.description(), "applied");
                    result.record(op, OpOutcome::Applied, None);
                }
                Err(OpError::Store(e)) if e.is_unavailable() => {
                    tracing::warn!(path = %op.path(), error = %e, "store unavailable; halting");
                    result.record(op, OpOutcome::Failed(e.kind()), Some(e.to_string()));
                    for rest in ops.by_ref() {
                        result.record(rest, OpOutcome::Skipped(ErrorKind::BackendUnavailable), None);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %op.path(), error = %e, "op failed");
                    result.record(op, OpOutcome::Failed(e.kind()), Some(e.to_string()));
                }
            }
        }

        tracing::info!(
            environment = %result.environment,
            applied = result.applied,
            failed = result.failed,
            skipped = result.skipped,
            "plan executed"
        );
        Ok(result)
    }

    async fn apply(&self, op: &MutationOp) -> Result<(), OpError> {
        let key = self
            .environment
            .absolute(op.path())
            .to_store_key()
            .map_err(|e| OpError::Path(e.to_string()))?;

        let call = async {
            match op {
                MutationOp::Put {
                    value, expected, ..
                } => self.store.put(&key, value, Some(*expected)).await,
                MutationOp::Delete { expected, .. } => {
                    self.store.delete(&key, Some(*expected)).await
                }
            }
        };
        with_timeout(self.timeout, call).await.map_err(OpError::Store)
    }
}

/// Why one op failed.
#[derive(Debug, Error)]
enum OpError {
    #[error("{0}")]
    Store(KvError),
    #[error("{0}")]
    Path(String),
}

impl OpError {
    fn kind(&self) -> ErrorKind {
        match self {
            OpError::Store(e) => e.kind(),
            OpError::Path(_) => ErrorKind::InvalidPath,
        }
    }
}
