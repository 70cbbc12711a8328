//! engine::snapshot
//!
//! Point-in-time copies of an environment's key tree.
//!
//! # Consistency
//!
//! A [`Snapshot`] is NOT atomic across keys. The store has no multi-key
//! read transaction, so a tree fetched in several requests may mix states
//! if another writer is active. Writes planned from a snapshot carry the
//! modify index of every key they overwrite, so a stale snapshot causes
//! `ConcurrentModification` failures rather than lost updates.
//!
//! # Loading
//!
//! [`SnapshotLoader`] lists the immediate children of the environment
//! prefix, then fetches each child subtree (or leaf key) as its own
//! request, running up to `concurrency` requests at once. Results are
//! disjoint and are merged into one ordered map after all complete.
//!
//! Folder markers (keys ending in `/`) and a key equal to the prefix
//! itself are skipped. Any key outside the prefix, or that is not a valid
//! path, fails the whole load.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::core::path::{KeyPath, PathError, SEPARATOR};
use crate::core::types::{Connection, Environment, ErrorKind, KeyEntry, ModifyIndex};
use crate::kv::{KvError, KvStore, RemoteEntry};

/// Errors from loading a snapshot.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The store failed or timed out.
    #[error("failed to read environment '{environment}': {source}")]
    Store {
        /// Environment being read.
        environment: String,
        /// Underlying store error.
        #[source]
        source: KvError,
    },

    /// The store returned a key that cannot be placed in the tree.
    #[error("failed to read environment '{environment}': {source}")]
    Path {
        /// Environment being read.
        environment: String,
        /// The offending key.
        #[source]
        source: PathError,
    },
}

impl LoadError {
    /// The user-visible error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Store { source, .. } => source.kind(),
            LoadError::Path { source, .. } => source.kind(),
        }
    }
}

/// An immutable, ordered copy of one environment's keys.
///
/// Paths are relative to the environment prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    environment: String,
    entries: BTreeMap<KeyPath, KeyEntry>,
    read_index: ModifyIndex,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot from entries, stamped with the current time.
    ///
    /// Later entries with the same path replace earlier ones.
    pub fn new(
        environment: impl Into<String>,
        entries: impl IntoIterator<Item = KeyEntry>,
        read_index: ModifyIndex,
    ) -> Self {
        Self {
            environment: environment.into(),
            entries: entries.into_iter().map(|e| (e.path.clone(), e)).collect(),
            read_index,
            taken_at: Utc::now(),
        }
    }

    /// An empty snapshot.
    pub fn empty(environment: impl Into<String>) -> Self {
        Self::new(environment, std::iter::empty(), ModifyIndex::ABSENT)
    }

    /// Replace the timestamp (builder pattern). Used when restoring a
    /// stored snapshot.
    pub fn with_taken_at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = taken_at;
        self
    }

    /// Name of the environment this was read from.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Highest store index observed while reading.
    pub fn read_index(&self) -> ModifyIndex {
        self.read_index
    }

    /// When the read completed.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Look up one key.
    pub fn get(&self, path: &KeyPath) -> Option<&KeyEntry> {
        self.entries.get(path)
    }

    /// Whether a key is present.
    pub fn contains(&self, path: &KeyPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in path order.
    pub fn iter(&self) -> btree_map::Values<'_, KeyPath, KeyEntry> {
        self.entries.values()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries at or below `prefix`.
    pub fn under<'a>(&'a self, prefix: &'a KeyPath) -> impl Iterator<Item = &'a KeyEntry> + 'a {
        self.entries
            .range(prefix.clone()..)
            .take_while(move |(path, _)| prefix.is_prefix_of(path))
            .map(|(_, entry)| entry)
    }

    /// Whether both snapshots hold the same paths with the same values,
    /// ignoring indices, flags and environment.
    pub fn same_contents(&self, other: &Snapshot) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((pa, a), (pb, b))| pa == pb && a.value == b.value)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a KeyEntry;
    type IntoIter = btree_map::Values<'a, KeyPath, KeyEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One unit of loader work.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fetch {
    /// A folder: fetch everything under it.
    Subtree(String),
    /// A leaf key.
    Key(String),
}

/// Reads environments into snapshots.
///
/// Read-only against the store.
pub struct SnapshotLoader<'a> {
    store: &'a dyn KvStore,
    concurrency: usize,
    timeout: Duration,
}

impl<'a> SnapshotLoader<'a> {
    /// Default number of concurrent subtree requests.
    pub const DEFAULT_CONCURRENCY: usize = 8;

    /// Create a loader over `store`.
    pub fn new(store: &'a dyn KvStore) -> Self {
        Self {
            store,
            concurrency: Self::DEFAULT_CONCURRENCY,
            timeout: Connection::DEFAULT_TIMEOUT,
        }
    }

    /// Set the maximum number of in-flight requests (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-request time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read every key under `env`'s prefix.
    ///
    /// An empty tree yields an empty snapshot.
    ///
    /// # Errors
    ///
    /// - `BackendUnavailable` on transport failure or timeout
    /// - `PermissionDenied` if the token is refused
    /// - `NotUnderBase` / `InvalidPath` if the store returns a key that
    ///   does not belong in the tree
    pub async fn load(&self, env: &Environment) -> Result<Snapshot, LoadError> {
        let store_err = |source: KvError| LoadError::Store {
            environment: env.name.clone(),
            source,
        };
        let path_err = |source: PathError| LoadError::Path {
            environment: env.name.clone(),
            source,
        };

        let base = env.prefix.to_store_prefix().map_err(path_err)?;
        tracing::debug!(environment = %env.name, prefix = %base, store = self.store.name(), "loading snapshot");

        let children = self
            .guarded(self.store.list_keys(&base, Some(SEPARATOR)))
            .await
            .map_err(store_err)?;

        let fetches: Vec<Fetch> = children
            .into_iter()
            .filter(|key| *key != base)
            .map(|key| {
                if key.ends_with(SEPARATOR) {
                    Fetch::Subtree(key)
                } else {
                    Fetch::Key(key)
                }
            })
            .collect();
        tracing::debug!(environment = %env.name, requests = fetches.len(), "fetching subtrees");

        let parts: Vec<(Vec<RemoteEntry>, ModifyIndex)> = stream::iter(fetches)
            .map(|fetch| self.fetch(fetch))
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await
            .map_err(store_err)?;

        let mut read_index = ModifyIndex::ABSENT;
        let mut entries = BTreeMap::new();
        for (remote, index) in parts {
            read_index = read_index.max(index);
            for entry in remote {
                if let Some(entry) = to_key_entry(&env.prefix, entry).map_err(path_err)? {
                    read_index = read_index.max(entry.modify_index);
                    entries.insert(entry.path.clone(), entry);
                }
            }
        }

        tracing::debug!(environment = %env.name, keys = entries.len(), index = %read_index, "snapshot loaded");
        Ok(Snapshot {
            environment: env.name.clone(),
            entries,
            read_index,
            taken_at: Utc::now(),
        })
    }

    async fn fetch(&self, fetch: Fetch) -> Result<(Vec<RemoteEntry>, ModifyIndex), KvError> {
        match fetch {
            Fetch::Subtree(prefix) => {
                let listing = self.guarded(self.store.list_under(&prefix)).await?;
                Ok((listing.entries, listing.index))
            }
            Fetch::Key(key) => {
                // A key listed a moment ago may be gone by now.
                let entry = self.guarded(self.store.get(&key)).await?;
                let index = entry.as_ref().map(|e| e.modify_index).unwrap_or_default();
                Ok((entry.into_iter().collect(), index))
            }
        }
    }

    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, KvError>>,
    ) -> Result<T, KvError> {
        with_timeout(self.timeout, call).await
    }
}

/// Bound a store call, mapping expiry to `Unavailable`.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, KvError>>,
) -> Result<T, KvError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(KvError::Unavailable(format!(
            "request timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

/// Convert a remote entry into a relative entry, or `None` for keys that
/// are not values (folder markers, the prefix itself).
fn to_key_entry(base: &KeyPath, remote: RemoteEntry) -> Result<Option<KeyEntry>, PathError> {
    if remote.key.ends_with(SEPARATOR) {
        return Ok(None);
    }
    let full = KeyPath::from_store_key(&remote.key)?;
    let path = full.relative_to(base)?;
    if path.is_root() {
        return Ok(None);
    }
    Ok(Some(KeyEntry {
        path,
        value: remote.value,
        modify_index: remote.modify_index,
        flags: remote.flags,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mock::{FailOn, MockKv, MockOperation};

    fn p(s: &str) -> KeyPath {
        KeyPath::parse(s).unwrap()
    }

    fn env(prefix: &str) -> Environment {
        Environment::new("test", p(prefix))
    }

    mod snapshot {
        use super::*;

        #[test]
        fn entries_are_ordered_by_path() {
            let snap = Snapshot::new(
                "dev",
                vec![
                    KeyEntry::new(p("b"), "2", ModifyIndex::new(2)),
                    KeyEntry::new(p("a/x"), "1", ModifyIndex::new(1)),
                ],
                ModifyIndex::new(2),
            );
            let paths: Vec<String> = snap.iter().map(|e| e.path.to_string()).collect();
            assert_eq!(paths, vec!["a/x", "b"]);
            assert_eq!(snap.get(&p("b")).unwrap().value, b"2");
        }

        #[test]
        fn under_prefix() {
            let snap = Snapshot::new(
                "dev",
                vec![
                    KeyEntry::new(p("app/db/host"), "h", ModifyIndex::new(1)),
                    KeyEntry::new(p("app/db/port"), "p", ModifyIndex::new(1)),
                    KeyEntry::new(p("app/dc"), "d", ModifyIndex::new(1)),
                ],
                ModifyIndex::new(1),
            );
            let prefix = p("app/db");
            assert_eq!(snap.under(&prefix).count(), 2);
        }

        #[test]
        fn same_contents_ignores_indices() {
            let a = Snapshot::new("a", vec![KeyEntry::new(p("k"), "v", ModifyIndex::new(1))], ModifyIndex::new(1));
            let b = Snapshot::new("b", vec![KeyEntry::new(p("k"), "v", ModifyIndex::new(9))], ModifyIndex::new(9));
            let c = Snapshot::new("c", vec![KeyEntry::new(p("k"), "w", ModifyIndex::new(1))], ModifyIndex::new(1));
            assert!(a.same_contents(&b));
            assert!(!a.same_contents(&c));
            assert!(Snapshot::empty("x").same_contents(&Snapshot::empty("y")));
        }
    }

    mod loader {
        use super::*;

        #[tokio::test]
        async fn empty_tree_is_empty_snapshot() {
            let store = MockKv::new();
            let snap = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap();
            assert!(snap.is_empty());
            assert_eq!(snap.environment(), "test");
        }

        #[tokio::test]
        async fn loads_nested_keys_relative_to_prefix() {
            let store = MockKv::with_pairs([
                ("prod/app/db/host", "db1"),
                ("prod/app/db/port", "5432"),
                ("prod/flag", "on"),
                ("staging/app/db/host", "db2"),
            ]);
            let snap = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap();

            assert_eq!(snap.len(), 3);
            assert_eq!(snap.get(&p("app/db/host")).unwrap().value, b"db1");
            assert_eq!(snap.get(&p("flag")).unwrap().value, b"on");
            assert!(!snap.contains(&p("staging/app/db/host")));
        }

        #[tokio::test]
        async fn does_not_match_sibling_prefixes() {
            let store = MockKv::with_pairs([("prod/a", "1"), ("production/b", "2")]);
            let snap = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap();
            assert_eq!(snap.len(), 1);
        }

        #[tokio::test]
        async fn root_prefix_loads_everything() {
            let store = MockKv::with_pairs([("a", "1"), ("b/c", "2")]);
            let snap = SnapshotLoader::new(&store).load(&env("")).await.unwrap();
            assert_eq!(snap.len(), 2);
        }

        #[tokio::test]
        async fn skips_folder_markers_and_prefix_key() {
            let store = MockKv::with_pairs([
                ("prod/", ""),
                ("prod/app/", ""),
                ("prod/app/x", "1"),
            ]);
            let snap = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap();
            let paths: Vec<String> = snap.iter().map(|e| e.path.to_string()).collect();
            assert_eq!(paths, vec!["app/x"]);
        }

        #[tokio::test]
        async fn read_index_is_highest_seen() {
            let store = MockKv::new();
            store.put_sync("prod/a", "1");
            store.put_sync("prod/b/c", "2");
            let last = store.put_sync("other", "3");
            let snap = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap();
            assert!(snap.read_index() >= snap.get(&p("b/c")).unwrap().modify_index);
            assert!(snap.read_index() <= last);
        }

        #[tokio::test]
        async fn fans_out_one_request_per_child() {
            let store = MockKv::with_pairs([
                ("prod/a/1", "x"),
                ("prod/b/1", "x"),
                ("prod/c", "x"),
            ]);
            SnapshotLoader::new(&store)
                .with_concurrency(2)
                .load(&env("prod"))
                .await
                .unwrap();

            let ops = store.operations();
            assert_eq!(
                ops.iter().filter(|o| matches!(o, MockOperation::ListKeys { .. })).count(),
                1
            );
            assert_eq!(
                ops.iter().filter(|o| matches!(o, MockOperation::ListUnder { .. })).count(),
                2
            );
            assert_eq!(
                ops.iter().filter(|o| matches!(o, MockOperation::Get { .. })).count(),
                1
            );
            assert!(store.writes().is_empty());
        }

        #[tokio::test]
        async fn unavailable_store() {
            let store = MockKv::with_pairs([("prod/a/b", "1")])
                .fail_on(FailOn::ListUnder(KvError::Unavailable("connection refused".into())));
            let err = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        }

        #[tokio::test]
        async fn permission_denied() {
            let store = MockKv::new()
                .fail_on(FailOn::ListKeys(KvError::PermissionDenied("ACL not found".into())));
            let err = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        }

        #[tokio::test]
        async fn invalid_key_fails_closed() {
            let store = MockKv::with_pairs([("prod/a//b", "1")]);
            let err = SnapshotLoader::new(&store).load(&env("prod")).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidPath);
        }

        #[tokio::test(start_paused = true)]
        async fn slow_store_times_out() {
            let store = MockKv::with_pairs([("prod/a", "1")]).with_latency(Duration::from_secs(30));
            let err = SnapshotLoader::new(&store)
                .with_timeout(Duration::from_secs(1))
                .load(&env("prod"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        }
    }

    #[test]
    fn to_key_entry_outside_base() {
        let remote = RemoteEntry {
            key: "dev/x".into(),
            value: vec![],
            modify_index: ModifyIndex::new(1),
            flags: 0,
        };
        let err = to_key_entry(&p("prod"), remote).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotUnderBase);
    }
}
