//! engine::baseline
//!
//! Persisted common ancestors for two-way sync.
//!
//! After a two-way sync leaves both environments identical, the agreed
//! state is written here. The next two-way sync of the same ordered pair
//! reads it back as the baseline that tells one-sided changes apart from
//! conflicts.
//!
//! # Location
//!
//! `$CONSULKV_STATE_DIR` if set, else `<data dir>/consulkv/state`. One
//! JSON file per ordered pair, named `<source>+<target>.json`. Environment
//! names cannot contain `+`, so names never collide.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::snapshot::Snapshot;
use crate::core::types::{KeyEntry, ModifyIndex};

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV_VAR: &str = "CONSULKV_STATE_DIR";

const FORMAT_VERSION: u32 = 1;

/// Errors from the baseline store.
#[derive(Debug, Error)]
pub enum BaselineError {
    /// I/O error reading or writing baseline files.
    #[error("baseline i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("baseline json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No state directory could be determined.
    #[error("cannot determine a state directory; set {STATE_DIR_ENV_VAR}")]
    NoStateDir,

    /// The file exists but is not usable.
    #[error("invalid baseline {path}: {reason}")]
    Invalid {
        /// The offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// On-disk form of a baseline.
#[derive(Debug, Serialize, Deserialize)]
struct BaselineFile {
    version: u32,
    source: String,
    target: String,
    taken_at: DateTime<Utc>,
    read_index: ModifyIndex,
    entries: Vec<KeyEntry>,
}

/// Directory of stored baselines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    /// Use `dir` as the state directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The default state directory.
    ///
    /// # Errors
    ///
    /// Returns `NoStateDir` if neither the override variable nor a platform
    /// data directory is available.
    pub fn default_location() -> Result<Self, BaselineError> {
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(Self::new(dir));
        }
        dirs::data_dir()
            .map(|d| Self::new(d.join("consulkv").join("state")))
            .ok_or(BaselineError::NoStateDir)
    }

    /// The state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, source: &str, target: &str) -> PathBuf {
        self.dir.join(format!("{}+{}.json", source, target))
    }

    /// Read the baseline for `source` -> `target`.
    ///
    /// Returns `None` if there is none.
    pub fn load(&self, source: &str, target: &str) -> Result<Option<Snapshot>, BaselineError> {
        let path = self.file_path(source, target);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no baseline");
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let file: BaselineFile = serde_json::from_str(&content)?;
        if file.version != FORMAT_VERSION {
            return Err(BaselineError::Invalid {
                path,
                reason: format!("unsupported version {}", file.version),
            });
        }
        if file.source != source || file.target != target {
            return Err(BaselineError::Invalid {
                path,
                reason: format!("recorded for {} -> {}", file.source, file.target),
            });
        }

        tracing::debug!(path = %path.display(), keys = file.entries.len(), "baseline loaded");
        Ok(Some(
            Snapshot::new(file.source, file.entries, file.read_index).with_taken_at(file.taken_at),
        ))
    }

    /// Store `snapshot` (taken from `source`) as the baseline for
    /// `source` -> `target`, replacing any previous one.
    pub fn save(&self, source: &str, target: &str, snapshot: &Snapshot) -> Result<(), BaselineError> {
        fs::create_dir_all(&self.dir)?;

        let file = BaselineFile {
            version: FORMAT_VERSION,
            source: source.to_string(),
            target: target.to_string(),
            taken_at: snapshot.taken_at(),
            read_index: snapshot.read_index(),
            entries: snapshot.iter().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        // Write then rename so a crash never leaves a truncated baseline.
        let path = self.file_path(source, target);
        let tmp = path.with_extension("json.tmp");
        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        out.write_all(content.as_bytes())?;
        out.sync_all()?;
        fs::rename(&tmp, &path)?;

        tracing::debug!(path = %path.display(), keys = file.entries.len(), "baseline saved");
        Ok(())
    }

    /// Remove the baseline for `source` -> `target`, if any.
    pub fn clear(&self, source: &str, target: &str) -> Result<(), BaselineError> {
        let path = self.file_path(source, target);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::KeyPath;
    use tempfile::TempDir;

    fn snapshot() -> Snapshot {
        Snapshot::new(
            "dev",
            vec![
                KeyEntry::new(KeyPath::parse("app/a").unwrap(), "1", ModifyIndex::new(4)),
                KeyEntry::new(KeyPath::parse("app/b").unwrap(), vec![0u8, 159, 146], ModifyIndex::new(9)),
            ],
            ModifyIndex::new(12),
        )
    }

    #[test]
    fn missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path());
        assert!(store.load("dev", "prod").unwrap().is_none());
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path().join("nested"));
        let snap = snapshot();

        store.save("dev", "prod", &snap).unwrap();
        let loaded = store.load("dev", "prod").unwrap().unwrap();

        assert_eq!(loaded, snap);
        assert!(store.load("prod", "dev").unwrap().is_none());
        assert!(!dir.path().join("nested").join("dev+prod.json.tmp").exists());
    }

    #[test]
    fn clear_removes() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path());
        store.save("dev", "prod", &snapshot()).unwrap();
        store.clear("dev", "prod").unwrap();
        assert!(store.load("dev", "prod").unwrap().is_none());
        store.clear("dev", "prod").unwrap();
    }

    #[test]
    fn mislabelled_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = BaselineStore::new(dir.path());
        store.save("dev", "prod", &snapshot()).unwrap();
        fs::rename(dir.path().join("dev+prod.json"), dir.path().join("dev+qa.json")).unwrap();

        let err = store.load("dev", "qa").unwrap_err();
        assert!(matches!(err, BaselineError::Invalid { .. }));
    }

    #[test]
    fn corrupt_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("dev+prod.json"), "{ not json").unwrap();
        let err = BaselineStore::new(dir.path()).load("dev", "prod").unwrap_err();
        assert!(matches!(err, BaselineError::Json(_)));
    }
}
