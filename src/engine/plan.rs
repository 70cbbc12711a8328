//! engine::plan
//!
//! Sync planning: turning snapshot differences into mutations.
//!
//! # Architecture
//!
//! Plans are the sole intermediate representation between snapshots and
//! store mutation. They are:
//! - **Deterministic**: the same snapshots and policy give the same ops
//! - **Previewable**: shown to the user before execution
//! - **Serializable**: emitted as JSON under `--json`
//!
//! # Invariants
//!
//! - The planner performs no I/O
//! - Every op carries the modify index read from the snapshot it
//!   overwrites, so the executor can detect keys changed since the read
//! - Within a plan every put precedes every delete
//! - A conflict under [`ConflictPolicy::Abort`] yields an error and no ops
//!
//! # Conflict Rules
//!
//! `SourceWins` and `TargetWins` name the environment whose value
//! prevails, whatever the direction.
//!
//! One-way sync treats every `Changed` key as a conflict. Keys only on the
//! receiving side are left alone unless `prune` is set.
//!
//! Two-way sync compares each side against the baseline (the state both
//! sides last agreed on). A key changed on one side only is copied to the
//! other; a key changed on both sides is a conflict. Without a baseline,
//! keys present on one side only are copied and keys present on both with
//! different values conflict.
//!
//! # Example
//!
//! ```
//! use consulkv::core::{KeyEntry, KeyPath, ModifyIndex};
//! use consulkv::engine::plan::{SyncPlanner, SyncPolicy};
//! use consulkv::engine::snapshot::Snapshot;
//!
//! let key = KeyPath::parse("app/db/host").unwrap();
//! let source = Snapshot::new("dev", [KeyEntry::new(key.clone(), "a", ModifyIndex::new(3))], ModifyIndex::new(3));
//! let target = Snapshot::new("prod", [KeyEntry::new(key, "b", ModifyIndex::new(9))], ModifyIndex::new(9));
//!
//! let plan = SyncPlanner::new(SyncPolicy::default()).plan(&source, &target, None).unwrap();
//! assert_eq!(plan.to_target.len(), 1);
//! assert!(plan.to_source.is_empty());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::diff::{diff, DiffDirection, DiffEntry};
use super::snapshot::Snapshot;
use crate::core::path::KeyPath;
use crate::core::types::{base64_bytes, ErrorKind, KeyEntry, ModifyIndex};

/// Which way changes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Make the target look like the source.
    #[default]
    SourceToTarget,
    /// Make the source look like the target.
    TargetToSource,
    /// Merge changes from both sides against a baseline.
    TwoWay,
}

impl SyncDirection {
    /// The equivalent diff direction for one-way syncs.
    pub fn diff_direction(self) -> Option<DiffDirection> {
        match self {
            SyncDirection::SourceToTarget => Some(DiffDirection::SourceToTarget),
            SyncDirection::TargetToSource => Some(DiffDirection::TargetToSource),
            SyncDirection::TwoWay => None,
        }
    }
}

/// What to do when both sides hold different values for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The source environment's value prevails.
    #[default]
    SourceWins,
    /// The target environment's value prevails.
    TargetWins,
    /// Fail planning, listing every conflicting key.
    Abort,
}

/// Configuration for one planning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Which way changes flow.
    pub direction: SyncDirection,
    /// Conflict resolution.
    pub on_conflict: ConflictPolicy,
    /// Produce a plan that can be shown but not executed.
    pub dry_run: bool,
    /// In one-way sync, delete keys the receiving side has and the sending
    /// side does not.
    pub prune: bool,
}

/// A single store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    /// Write a value.
    Put {
        /// Path relative to the plan's environment.
        path: KeyPath,
        /// New value.
        #[serde(with = "base64_bytes")]
        value: Vec<u8>,
        /// Index the key must still have; `ABSENT` if it must not exist.
        expected: ModifyIndex,
    },
    /// Remove a key.
    Delete {
        /// Path relative to the plan's environment.
        path: KeyPath,
        /// Index the key must still have.
        expected: ModifyIndex,
    },
}

impl MutationOp {
    /// Put `value` over `current` (the receiving side's entry, if any).
    pub fn put_over(path: &KeyPath, value: &[u8], current: Option<&KeyEntry>) -> Self {
        MutationOp::Put {
            path: path.clone(),
            value: value.to_vec(),
            expected: current.map(|e| e.modify_index).unwrap_or(ModifyIndex::ABSENT),
        }
    }

    /// Delete `current`.
    pub fn delete(current: &KeyEntry) -> Self {
        MutationOp::Delete {
            path: current.path.clone(),
            expected: current.modify_index,
        }
    }

    /// The affected path.
    pub fn path(&self) -> &KeyPath {
        match self {
            MutationOp::Put { path, .. } | MutationOp::Delete { path, .. } => path,
        }
    }

    /// The precondition index.
    pub fn expected(&self) -> ModifyIndex {
        match self {
            MutationOp::Put { expected, .. } | MutationOp::Delete { expected, .. } => *expected,
        }
    }

    /// Whether this is a put.
    pub fn is_put(&self) -> bool {
        matches!(self, MutationOp::Put { .. })
    }

    /// Short verb for output.
    pub fn action(&self) -> &'static str {
        match self {
            MutationOp::Put { expected, .. } if expected.is_absent() => "create",
            MutationOp::Put { .. } => "update",
            MutationOp::Delete { .. } => "delete",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        match self {
            MutationOp::Put {
                path,
                value,
                expected,
            } => {
                let value = String::from_utf8_lossy(value);
                if expected.is_absent() {
                    format!("Create {} = {}", path, value)
                } else {
                    format!("Update {} = {} (at index {})", path, value, expected)
                }
            }
            MutationOp::Delete { path, expected } => {
                format!("Delete {} (at index {})", path, expected)
            }
        }
    }
}

/// Unique identifier for a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    /// Generate a new unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a PlanId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered mutations against one environment.
///
/// Plans are immutable once built and consumed by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Environment the ops apply to.
    pub environment: String,
    /// Whether the plan is for display only.
    pub dry_run: bool,
    /// Ops in execution order: all puts, then all deletes.
    ops: Vec<MutationOp>,
}

impl Plan {
    /// Create an empty plan for `environment`.
    ///
    /// # Example
    ///
    /// ```
    /// use consulkv::engine::plan::Plan;
    ///
    /// let plan = Plan::new("prod");
    /// assert!(plan.is_empty());
    /// ```
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            id: PlanId::new(),
            environment: environment.into(),
            dry_run: false,
            ops: Vec::new(),
        }
    }

    /// Set the id (builder pattern).
    pub fn with_id(mut self, id: PlanId) -> Self {
        self.id = id;
        self
    }

    /// Tag the plan as display-only (builder pattern).
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Add an op, keeping puts ahead of deletes (builder pattern).
    pub fn with_op(mut self, op: MutationOp) -> Self {
        self.push(op);
        self
    }

    /// Add several ops.
    pub fn with_ops(mut self, ops: impl IntoIterator<Item = MutationOp>) -> Self {
        for op in ops {
            self.push(op);
        }
        self
    }

    fn push(&mut self, op: MutationOp) {
        if op.is_put() {
            let at = self.ops.partition_point(MutationOp::is_put);
            self.ops.insert(at, op);
        } else {
            self.ops.push(op);
        }
    }

    /// The ops in order.
    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    /// Take the ops out of the plan.
    pub fn into_ops(self) -> Vec<MutationOp> {
        self.ops
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of ops.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Number of puts.
    pub fn put_count(&self) -> usize {
        self.ops.partition_point(MutationOp::is_put)
    }

    /// Number of deletes.
    pub fn delete_count(&self) -> usize {
        self.ops.len() - self.put_count()
    }

    /// SHA-256 digest of the canonical JSON serialization.
    ///
    /// # Example
    ///
    /// ```
    /// use consulkv::engine::plan::Plan;
    ///
    /// assert!(Plan::new("prod").digest().starts_with("sha256:"));
    /// ```
    pub fn digest(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Human-readable description for confirmation prompts.
    pub fn preview(&self) -> String {
        let header = if self.dry_run {
            format!("{} (dry run)", self.environment)
        } else {
            self.environment.clone()
        };
        if self.is_empty() {
            return format!("{}: No changes needed", header);
        }

        let mut lines = vec![format!("{}:", header)];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, op.description()));
        }
        lines.join("\n")
    }
}

/// Planner output: one plan per side.
///
/// One-way syncs leave the sending side's plan empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Ops against the target environment.
    pub to_target: Plan,
    /// Ops against the source environment.
    pub to_source: Plan,
    /// Conflicting keys that were resolved by policy.
    pub resolved_conflicts: Vec<KeyPath>,
}

impl SyncPlan {
    /// Whether neither side needs changes.
    pub fn is_empty(&self) -> bool {
        self.to_target.is_empty() && self.to_source.is_empty()
    }

    /// Total op count.
    pub fn len(&self) -> usize {
        self.to_target.len() + self.to_source.len()
    }

    /// Whether the plans are display-only.
    pub fn is_dry_run(&self) -> bool {
        self.to_target.dry_run
    }

    /// Both plans, target first.
    pub fn plans(&self) -> [&Plan; 2] {
        [&self.to_target, &self.to_source]
    }
}

/// Errors from plan generation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    /// Keys hold different values on both sides and the policy is abort.
    #[error("sync conflict on {} key(s): {}", .paths.len(), list_paths(.paths))]
    SyncConflict {
        /// Every conflicting key, in path order.
        paths: Vec<KeyPath>,
    },

    /// The baseline does not describe this pair of environments.
    #[error("baseline is for '{found}', expected '{expected}'")]
    BaselineMismatch {
        /// Environment the baseline should have been taken from.
        expected: String,
        /// Environment it was taken from.
        found: String,
    },
}

impl PlanError {
    /// The user-visible error kind, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PlanError::SyncConflict { .. } => Some(ErrorKind::SyncConflict),
            PlanError::BaselineMismatch { .. } => None,
        }
    }
}

fn value(entry: Option<&KeyEntry>) -> Option<&[u8]> {
    entry.map(|e| e.value.as_slice())
}

fn list_paths(paths: &[KeyPath]) -> String {
    const SHOWN: usize = 10;
    let mut out: Vec<String> = paths.iter().take(SHOWN).map(ToString::to_string).collect();
    if paths.len() > SHOWN {
        out.push(format!("and {} more", paths.len() - SHOWN));
    }
    out.join(", ")
}

/// Turns snapshot pairs into sync plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncPlanner {
    policy: SyncPolicy,
}

/// Which environment an op goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Source,
    Target,
}

impl SyncPlanner {
    /// Create a planner for `policy`.
    pub fn new(policy: SyncPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect.
    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Plan a sync from `source` to `target`.
    ///
    /// `baseline` is the last state both sides agreed on; it is used only
    /// by two-way sync and must have been taken from `source`.
    ///
    /// # Errors
    ///
    /// - `SyncConflict` under [`ConflictPolicy::Abort`] if any key conflicts
    /// - `BaselineMismatch` if `baseline` came from another environment
    pub fn plan(
        &self,
        source: &Snapshot,
        target: &Snapshot,
        baseline: Option<&Snapshot>,
    ) -> Result<SyncPlan, PlanError> {
        let mut ops: Vec<(Side, MutationOp)> = Vec::new();
        let mut conflicts: Vec<KeyPath> = Vec::new();

        match self.policy.direction.diff_direction() {
            Some(direction) => {
                self.plan_one_way(source, target, direction, &mut ops, &mut conflicts)
            }
            None => {
                if let Some(base) = baseline {
                    if base.environment() != source.environment() {
                        return Err(PlanError::BaselineMismatch {
                            expected: source.environment().to_string(),
                            found: base.environment().to_string(),
                        });
                    }
                }
                self.plan_two_way(source, target, baseline, &mut ops, &mut conflicts)
            }
        }

        if self.policy.on_conflict == ConflictPolicy::Abort && !conflicts.is_empty() {
            tracing::debug!(conflicts = conflicts.len(), "aborting plan on conflict");
            return Err(PlanError::SyncConflict { paths: conflicts });
        }

        let mut to_target = Plan::new(target.environment()).dry_run(self.policy.dry_run);
        let mut to_source = Plan::new(source.environment()).dry_run(self.policy.dry_run);
        for (side, op) in ops {
            tracing::debug!(side = ?side, op = %op.description(), "planned");
            match side {
                Side::Target => to_target.push(op),
                Side::Source => to_source.push(op),
            }
        }

        Ok(SyncPlan {
            to_target,
            to_source,
            resolved_conflicts: conflicts,
        })
    }

    fn plan_one_way(
        &self,
        source: &Snapshot,
        target: &Snapshot,
        direction: DiffDirection,
        ops: &mut Vec<(Side, MutationOp)>,
        conflicts: &mut Vec<KeyPath>,
    ) {
        let (receiver, sender_wins) = match direction {
            DiffDirection::SourceToTarget => (
                Side::Target,
                self.policy.on_conflict == ConflictPolicy::SourceWins,
            ),
            DiffDirection::TargetToSource => (
                Side::Source,
                self.policy.on_conflict == ConflictPolicy::TargetWins,
            ),
        };

        for entry in diff(source, target, direction) {
            match entry {
                DiffEntry::Added(new) => {
                    ops.push((receiver, MutationOp::put_over(&new.path, &new.value, None)));
                }
                DiffEntry::Changed { old, new } => {
                    conflicts.push(new.path.clone());
                    if sender_wins {
                        ops.push((receiver, MutationOp::put_over(&new.path, &new.value, Some(old))));
                    }
                }
                DiffEntry::Removed(old) if self.policy.prune => {
                    ops.push((receiver, MutationOp::delete(old)));
                }
                DiffEntry::Removed(_) | DiffEntry::Unchanged(_) => {}
            }
        }
    }

    fn plan_two_way(
        &self,
        source: &Snapshot,
        target: &Snapshot,
        baseline: Option<&Snapshot>,
        ops: &mut Vec<(Side, MutationOp)>,
        conflicts: &mut Vec<KeyPath>,
    ) {
        for entry in diff(source, target, DiffDirection::SourceToTarget) {
            if !entry.is_difference() {
                continue;
            }
            let path = entry.path();
            let s = source.get(path);
            let t = target.get(path);
            let b = baseline.and_then(|base| base.get(path));

            let winner = if value(t) == value(b) {
                Side::Source
            } else if value(s) == value(b) {
                Side::Target
            } else {
                conflicts.push(path.clone());
                match self.policy.on_conflict {
                    ConflictPolicy::SourceWins => Side::Source,
                    ConflictPolicy::TargetWins => Side::Target,
                    ConflictPolicy::Abort => continue,
                }
            };

            let (from, to, receiver) = match winner {
                Side::Source => (s, t, Side::Target),
                Side::Target => (t, s, Side::Source),
            };
            let op = match (from, to) {
                (Some(from), to) => Some(MutationOp::put_over(path, &from.value, to)),
                (None, Some(to)) => Some(MutationOp::delete(to)),
                (None, None) => None,
            };
            if let Some(op) = op {
                ops.push((receiver, op));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> KeyPath {
        KeyPath::parse(s).unwrap()
    }

    fn snap(name: &str, pairs: &[(&str, &str, u64)]) -> Snapshot {
        Snapshot::new(
            name,
            pairs
                .iter()
                .map(|(k, v, i)| KeyEntry::new(p(k), *v, ModifyIndex::new(*i))),
            ModifyIndex::new(pairs.iter().map(|(_, _, i)| *i).max().unwrap_or(0)),
        )
    }

    fn policy(direction: SyncDirection, on_conflict: ConflictPolicy) -> SyncPolicy {
        SyncPolicy {
            direction,
            on_conflict,
            ..SyncPolicy::default()
        }
    }

    fn put(path: &str, value: &str, expected: u64) -> MutationOp {
        MutationOp::Put {
            path: p(path),
            value: value.as_bytes().to_vec(),
            expected: ModifyIndex::new(expected),
        }
    }

    fn del(path: &str, expected: u64) -> MutationOp {
        MutationOp::Delete {
            path: p(path),
            expected: ModifyIndex::new(expected),
        }
    }

    mod plan {
        use super::*;

        #[test]
        fn new_is_empty() {
            let plan = Plan::new("prod");
            assert!(plan.is_empty());
            assert_eq!(plan.len(), 0);
            assert!(!plan.dry_run);
        }

        #[test]
        fn puts_precede_deletes() {
            let plan = Plan::new("prod")
                .with_op(del("a", 1))
                .with_op(put("b", "x", 0))
                .with_op(del("c", 2))
                .with_op(put("d", "y", 3));

            let actions: Vec<_> = plan.ops().iter().map(|o| o.path().to_string()).collect();
            assert_eq!(actions, vec!["b", "d", "a", "c"]);
            assert_eq!(plan.put_count(), 2);
            assert_eq!(plan.delete_count(), 2);
        }

        #[test]
        fn digest_deterministic() {
            let id = PlanId::from_string("fixed-id");
            let a = Plan::new("prod").with_id(id.clone()).with_op(put("k", "v", 0));
            let b = Plan::new("prod").with_id(id).with_op(put("k", "v", 0));
            assert_eq!(a.digest(), b.digest());
        }

        #[test]
        fn digest_changes_with_content() {
            let id = PlanId::from_string("fixed-id");
            let a = Plan::new("prod").with_id(id.clone()).with_op(put("k", "v", 0));
            let b = Plan::new("prod").with_id(id).with_op(put("k", "w", 0));
            assert_ne!(a.digest(), b.digest());
        }

        #[test]
        fn preview() {
            let plan = Plan::new("prod")
                .with_op(put("new", "1", 0))
                .with_op(put("old", "2", 7))
                .with_op(del("gone", 4));
            let text = plan.preview();
            assert!(text.starts_with("prod:"));
            assert!(text.contains("1. Create new = 1"));
            assert!(text.contains("2. Update old = 2 (at index 7)"));
            assert!(text.contains("3. Delete gone (at index 4)"));
            assert!(Plan::new("prod").preview().contains("No changes needed"));
        }

        #[test]
        fn ops_serialize_tagged() {
            let json = serde_json::to_value(put("k", "hi", 0)).unwrap();
            assert_eq!(json["op"], "put");
            assert_eq!(json["path"], "k");
            assert_eq!(json["value"], "aGk=");
            assert_eq!(json["expected"], 0);
        }
    }

    mod one_way {
        use super::*;

        #[test]
        fn overwrite_scenario_leaves_target_only_keys() {
            let source = snap("dev", &[("app/db/host", "a", 3)]);
            let target = snap("prod", &[("app/cache/ttl", "60", 4), ("app/db/host", "b", 5)]);

            let plan = SyncPlanner::new(policy(SyncDirection::SourceToTarget, ConflictPolicy::SourceWins))
                .plan(&source, &target, None)
                .unwrap();

            assert_eq!(plan.to_target.ops(), &[put("app/db/host", "a", 5)]);
            assert_eq!(plan.to_target.environment, "prod");
            assert!(plan.to_source.is_empty());
            assert_eq!(plan.resolved_conflicts, vec![p("app/db/host")]);
        }

        #[test]
        fn empty_snapshots() {
            let plan = SyncPlanner::default()
                .plan(&Snapshot::empty("a"), &Snapshot::empty("b"), None)
                .unwrap();
            assert!(plan.is_empty());
        }

        #[test]
        fn added_keys_must_not_exist() {
            let source = snap("dev", &[("k", "v", 2)]);
            let target = snap("prod", &[]);
            let plan = SyncPlanner::default().plan(&source, &target, None).unwrap();
            assert_eq!(plan.to_target.ops(), &[put("k", "v", 0)]);
            assert_eq!(plan.to_target.ops()[0].action(), "create");
        }

        #[test]
        fn target_wins_keeps_target_values() {
            let source = snap("dev", &[("k", "a", 1), ("new", "n", 2)]);
            let target = snap("prod", &[("k", "b", 3)]);
            let plan = SyncPlanner::new(policy(SyncDirection::SourceToTarget, ConflictPolicy::TargetWins))
                .plan(&source, &target, None)
                .unwrap();
            assert_eq!(plan.to_target.ops(), &[put("new", "n", 0)]);
        }

        #[test]
        fn abort_lists_every_conflict() {
            let source = snap("dev", &[("a", "1", 1), ("b", "2", 2), ("c", "3", 3)]);
            let target = snap("prod", &[("a", "x", 4), ("b", "2", 5), ("c", "y", 6)]);
            let err = SyncPlanner::new(policy(SyncDirection::SourceToTarget, ConflictPolicy::Abort))
                .plan(&source, &target, None)
                .unwrap_err();
            assert_eq!(
                err,
                PlanError::SyncConflict {
                    paths: vec![p("a"), p("c")]
                }
            );
            assert_eq!(err.kind(), Some(ErrorKind::SyncConflict));
            assert!(err.to_string().contains("2 key(s): a, c"));
        }

        #[test]
        fn prune_deletes_after_puts() {
            let source = snap("dev", &[("b", "new", 1)]);
            let target = snap("prod", &[("a", "stale", 7), ("c", "stale", 8)]);
            let planner = SyncPlanner::new(SyncPolicy {
                prune: true,
                ..SyncPolicy::default()
            });
            let plan = planner.plan(&source, &target, None).unwrap();
            assert_eq!(
                plan.to_target.ops(),
                &[put("b", "new", 0), del("a", 7), del("c", 8)]
            );
        }

        #[test]
        fn target_to_source_writes_source() {
            let source = snap("dev", &[("k", "a", 1), ("only-source", "s", 2)]);
            let target = snap("prod", &[("k", "b", 3), ("only-target", "t", 4)]);
            let plan = SyncPlanner::new(policy(SyncDirection::TargetToSource, ConflictPolicy::TargetWins))
                .plan(&source, &target, None)
                .unwrap();

            assert!(plan.to_target.is_empty());
            assert_eq!(plan.to_source.environment, "dev");
            assert_eq!(
                plan.to_source.ops(),
                &[put("k", "b", 1), put("only-target", "t", 0)]
            );
        }

        #[test]
        fn target_to_source_with_source_wins_skips_conflicts() {
            let source = snap("dev", &[("k", "a", 1)]);
            let target = snap("prod", &[("k", "b", 3)]);
            let plan = SyncPlanner::new(policy(SyncDirection::TargetToSource, ConflictPolicy::SourceWins))
                .plan(&source, &target, None)
                .unwrap();
            assert!(plan.is_empty());
        }

        #[test]
        fn dry_run_tags_both_plans() {
            let source = snap("dev", &[("k", "v", 1)]);
            let planner = SyncPlanner::new(SyncPolicy {
                dry_run: true,
                ..SyncPolicy::default()
            });
            let plan = planner.plan(&source, &Snapshot::empty("prod"), None).unwrap();
            assert!(plan.is_dry_run());
            assert!(plan.to_source.dry_run);
            assert_eq!(plan.len(), 1);
        }
    }

    mod two_way {
        use super::*;

        fn two_way(on_conflict: ConflictPolicy) -> SyncPlanner {
            SyncPlanner::new(policy(SyncDirection::TwoWay, on_conflict))
        }

        #[test]
        fn one_sided_changes_flow_both_ways() {
            let base = snap("dev", &[("a", "1", 1), ("b", "1", 1), ("c", "1", 1), ("d", "1", 1)]);
            // a changed in source, b changed in target, c deleted in source,
            // d deleted in target, e added in source, f added in target.
            let source = snap("dev", &[("a", "2", 10), ("b", "1", 1), ("d", "1", 1), ("e", "new", 11)]);
            let target = snap("prod", &[("a", "1", 5), ("b", "3", 20), ("c", "1", 6), ("f", "new", 21)]);

            let plan = two_way(ConflictPolicy::Abort)
                .plan(&source, &target, Some(&base))
                .unwrap();

            assert_eq!(
                plan.to_target.ops(),
                &[put("a", "2", 5), put("e", "new", 0), del("c", 6)]
            );
            assert_eq!(
                plan.to_source.ops(),
                &[put("b", "3", 1), put("f", "new", 0), del("d", 1)]
            );
            assert!(plan.resolved_conflicts.is_empty());
        }

        #[test]
        fn both_changed_aborts_with_no_ops() {
            let base = snap("dev", &[("k", "1", 1), ("ok", "1", 1)]);
            let source = snap("dev", &[("k", "2", 2), ("ok", "2", 3)]);
            let target = snap("prod", &[("k", "3", 4), ("ok", "1", 5)]);
            let err = two_way(ConflictPolicy::Abort)
                .plan(&source, &target, Some(&base))
                .unwrap_err();
            assert_eq!(err, PlanError::SyncConflict { paths: vec![p("k")] });
        }

        #[test]
        fn conflict_resolution_by_policy() {
            let base = snap("dev", &[("k", "1", 1)]);
            let source = snap("dev", &[("k", "2", 2)]);
            let target = snap("prod", &[("k", "3", 4)]);

            let plan = two_way(ConflictPolicy::SourceWins)
                .plan(&source, &target, Some(&base))
                .unwrap();
            assert_eq!(plan.to_target.ops(), &[put("k", "2", 4)]);
            assert!(plan.to_source.is_empty());

            let plan = two_way(ConflictPolicy::TargetWins)
                .plan(&source, &target, Some(&base))
                .unwrap();
            assert_eq!(plan.to_source.ops(), &[put("k", "3", 2)]);
            assert!(plan.to_target.is_empty());
        }

        #[test]
        fn delete_versus_modify_conflicts() {
            let base = snap("dev", &[("k", "1", 1)]);
            let source = snap("dev", &[]);
            let target = snap("prod", &[("k", "2", 4)]);

            let plan = two_way(ConflictPolicy::SourceWins)
                .plan(&source, &target, Some(&base))
                .unwrap();
            assert_eq!(plan.to_target.ops(), &[del("k", 4)]);
            assert_eq!(plan.resolved_conflicts, vec![p("k")]);
        }

        #[test]
        fn identical_changes_need_nothing() {
            let base = snap("dev", &[("k", "1", 1)]);
            let source = snap("dev", &[("k", "2", 2)]);
            let target = snap("prod", &[("k", "2", 4)]);
            let plan = two_way(ConflictPolicy::Abort)
                .plan(&source, &target, Some(&base))
                .unwrap();
            assert!(plan.is_empty());
        }

        #[test]
        fn without_baseline_copies_one_sided_keys() {
            let source = snap("dev", &[("s", "1", 1), ("both", "x", 2)]);
            let target = snap("prod", &[("t", "1", 3), ("both", "y", 4)]);
            let err = two_way(ConflictPolicy::Abort)
                .plan(&source, &target, None)
                .unwrap_err();
            assert_eq!(err, PlanError::SyncConflict { paths: vec![p("both")] });

            let plan = two_way(ConflictPolicy::TargetWins)
                .plan(&source, &target, None)
                .unwrap();
            assert_eq!(plan.to_target.ops(), &[put("s", "1", 0)]);
            assert_eq!(plan.to_source.ops(), &[put("both", "y", 2), put("t", "1", 0)]);
        }

        #[test]
        fn baseline_from_other_environment_rejected() {
            let base = snap("prod", &[]);
            let err = two_way(ConflictPolicy::Abort)
                .plan(&snap("dev", &[]), &snap("prod", &[]), Some(&base))
                .unwrap_err();
            assert!(matches!(err, PlanError::BaselineMismatch { .. }));
            assert_eq!(err.kind(), None);
        }
    }
}
