//! engine::diff
//!
//! Structural comparison of two snapshots.
//!
//! [`diff`] walks both snapshots in path order at once and yields one
//! [`DiffEntry`] per path in their union. It is lazy and cheap to restart:
//! [`Diff`] is `Clone`, and a clone resumes from the same position.
//!
//! Values are compared byte for byte; there is no whitespace or encoding
//! normalization.
//!
//! # Example
//!
//! ```
//! use consulkv::core::{KeyEntry, KeyPath, ModifyIndex};
//! use consulkv::engine::diff::{diff, DiffDirection, DiffSummary};
//! use consulkv::engine::snapshot::Snapshot;
//!
//! let path = KeyPath::parse("app/db/host").unwrap();
//! let source = Snapshot::new("dev", [KeyEntry::new(path.clone(), "a", ModifyIndex::new(1))], ModifyIndex::new(1));
//! let target = Snapshot::new("prod", [KeyEntry::new(path, "b", ModifyIndex::new(7))], ModifyIndex::new(7));
//!
//! let summary = DiffSummary::from_entries(diff(&source, &target, DiffDirection::SourceToTarget));
//! assert_eq!(summary.changed, 1);
//! ```

use std::cmp::Ordering;
use std::iter::Peekable;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::snapshot::Snapshot;
use crate::core::path::KeyPath;
use crate::core::types::KeyEntry;

/// Which snapshot is the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffDirection {
    /// Describe what it takes to turn the target into the source.
    #[default]
    SourceToTarget,
    /// Describe what it takes to turn the source into the target.
    TargetToSource,
}

/// One path's difference.
///
/// Carrying variants borrow the entries they came from, so consumers can
/// read modify indices without another lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffEntry<'a> {
    /// Present only in the sending side.
    Added(&'a KeyEntry),
    /// Present only in the receiving side.
    Removed(&'a KeyEntry),
    /// Present in both with different values.
    Changed {
        /// The receiving side's entry.
        old: &'a KeyEntry,
        /// The sending side's entry.
        new: &'a KeyEntry,
    },
    /// Present in both with identical values.
    Unchanged(&'a KeyPath),
}

impl<'a> DiffEntry<'a> {
    /// The path this entry is about.
    pub fn path(&self) -> &'a KeyPath {
        match self {
            DiffEntry::Added(e) | DiffEntry::Removed(e) => &e.path,
            DiffEntry::Changed { new, .. } => &new.path,
            DiffEntry::Unchanged(path) => path,
        }
    }

    /// Short label for output.
    pub fn label(&self) -> &'static str {
        match self {
            DiffEntry::Added(_) => "added",
            DiffEntry::Removed(_) => "removed",
            DiffEntry::Changed { .. } => "changed",
            DiffEntry::Unchanged(_) => "unchanged",
        }
    }

    /// Whether the two sides differ at this path.
    pub fn is_difference(&self) -> bool {
        !matches!(self, DiffEntry::Unchanged(_))
    }

    /// The same difference seen from the other side.
    pub fn mirrored(self) -> Self {
        match self {
            DiffEntry::Added(e) => DiffEntry::Removed(e),
            DiffEntry::Removed(e) => DiffEntry::Added(e),
            DiffEntry::Changed { old, new } => DiffEntry::Changed { old: new, new: old },
            unchanged => unchanged,
        }
    }
}

// Values go out as lossy UTF-8 so `--json` output stays readable.
impl Serialize for DiffEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DiffEntry", 4)?;
        s.serialize_field("status", self.label())?;
        s.serialize_field("path", self.path())?;
        match self {
            DiffEntry::Added(e) => {
                s.serialize_field("old", &None::<&str>)?;
                s.serialize_field("new", &Some(e.value_lossy()))?;
            }
            DiffEntry::Removed(e) => {
                s.serialize_field("old", &Some(e.value_lossy()))?;
                s.serialize_field("new", &None::<&str>)?;
            }
            DiffEntry::Changed { old, new } => {
                s.serialize_field("old", &Some(old.value_lossy()))?;
                s.serialize_field("new", &Some(new.value_lossy()))?;
            }
            DiffEntry::Unchanged(_) => {
                s.serialize_field("old", &None::<&str>)?;
                s.serialize_field("new", &None::<&str>)?;
            }
        }
        s.end()
    }
}

/// Lazy merge over two snapshots.
#[derive(Debug, Clone)]
pub struct Diff<'a> {
    sending: Peekable<std::collections::btree_map::Values<'a, KeyPath, KeyEntry>>,
    receiving: Peekable<std::collections::btree_map::Values<'a, KeyPath, KeyEntry>>,
}

impl<'a> Iterator for Diff<'a> {
    type Item = DiffEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let order = match (self.sending.peek(), self.receiving.peek()) {
            (None, None) => return None,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(r)) => s.path.cmp(&r.path),
        };

        match order {
            Ordering::Less => self.sending.next().map(DiffEntry::Added),
            Ordering::Greater => self.receiving.next().map(DiffEntry::Removed),
            Ordering::Equal => {
                let new = self.sending.next()?;
                let old = self.receiving.next()?;
                if new.value == old.value {
                    Some(DiffEntry::Unchanged(&new.path))
                } else {
                    Some(DiffEntry::Changed { old, new })
                }
            }
        }
    }
}

/// Compare two snapshots.
///
/// With `SourceToTarget`, keys only in `source` are `Added`, keys only in
/// `target` are `Removed`, and `Changed` carries `old = target`,
/// `new = source`. `TargetToSource` swaps the roles.
pub fn diff<'a>(source: &'a Snapshot, target: &'a Snapshot, direction: DiffDirection) -> Diff<'a> {
    let (sending, receiving) = match direction {
        DiffDirection::SourceToTarget => (source, target),
        DiffDirection::TargetToSource => (target, source),
    };
    Diff {
        sending: sending.iter().peekable(),
        receiving: receiving.iter().peekable(),
    }
}

/// Counts per difference class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    /// Keys only on the sending side.
    pub added: usize,
    /// Keys only on the receiving side.
    pub removed: usize,
    /// Keys on both sides with different values.
    pub changed: usize,
    /// Keys on both sides with equal values.
    pub unchanged: usize,
}

impl DiffSummary {
    /// Tally a sequence of entries.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = DiffEntry<'a>>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.record(&entry);
        }
        summary
    }

    /// Count one entry.
    pub fn record(&mut self, entry: &DiffEntry<'_>) {
        match entry {
            DiffEntry::Added(_) => self.added += 1,
            DiffEntry::Removed(_) => self.removed += 1,
            DiffEntry::Changed { .. } => self.changed += 1,
            DiffEntry::Unchanged(_) => self.unchanged += 1,
        }
    }

    /// Number of paths that differ.
    pub fn differences(&self) -> usize {
        self.added + self.removed + self.changed
    }

    /// Whether the two sides are identical.
    pub fn is_identical(&self) -> bool {
        self.differences() == 0
    }
}
