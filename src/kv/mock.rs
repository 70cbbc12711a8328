//! kv::mock
//!
//! In-memory store for deterministic testing.
//!
//! # Design
//!
//! The mock keeps keys in a sorted map and bumps a single store-wide index
//! on every write, as Consul's raft index does. It records every call and
//! can be told to fail specific operations or keys.
//!
//! # Example
//!
//! ```
//! use consulkv::kv::mock::MockKv;
//! use consulkv::kv::KvStore;
//! use consulkv::core::ModifyIndex;
//!
//! # tokio_test::block_on(async {
//! let store = MockKv::new();
//! store.put("app/port", b"8080", None).await.unwrap();
//!
//! let entry = store.get("app/port").await.unwrap().unwrap();
//! assert_eq!(entry.value, b"8080");
//!
//! // A stale index is refused.
//! let stale = store.put("app/port", b"9090", Some(ModifyIndex::new(999))).await;
//! assert!(stale.is_err());
//! # });
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{KvError, KvStore, Listing, RemoteEntry};
use crate::core::types::ModifyIndex;

/// Mock store for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockKv {
    inner: Arc<Mutex<MockKvInner>>,
}

#[derive(Debug, Default)]
struct MockKvInner {
    /// Key -> (value, modify index, flags).
    keys: BTreeMap<String, (Vec<u8>, u64, u64)>,
    /// Last index handed out.
    index: u64,
    /// Injected failures, checked in order.
    fail_on: Vec<FailOn>,
    /// Recorded operations.
    operations: Vec<MockOperation>,
    /// Artificial delay before every call.
    latency: Option<Duration>,
}

/// Which operation should fail.
#[derive(Debug, Clone)]
pub enum FailOn {
    /// Fail every `list_under`.
    ListUnder(KvError),
    /// Fail every `list_keys`.
    ListKeys(KvError),
    /// Fail every `get`.
    Get(KvError),
    /// Fail every `put`.
    Put(KvError),
    /// Fail `put` of one key.
    PutKey(String, KvError),
    /// Fail every `delete`.
    Delete(KvError),
    /// Fail `delete` of one key.
    DeleteKey(String, KvError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    ListUnder {
        prefix: String,
    },
    ListKeys {
        prefix: String,
        separator: Option<char>,
    },
    Get {
        key: String,
    },
    Put {
        key: String,
        value: Vec<u8>,
        expected: Option<ModifyIndex>,
    },
    Delete {
        key: String,
        expected: Option<ModifyIndex>,
    },
}

impl MockOperation {
    /// Whether this operation writes.
    pub fn is_write(&self) -> bool {
        matches!(self, MockOperation::Put { .. } | MockOperation::Delete { .. })
    }
}

impl MockKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `pairs`, written in order.
    pub fn with_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new();
        for (key, value) in pairs {
            store.put_sync(key, value);
        }
        store
    }

    /// Add a failure rule (builder pattern).
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.lock().fail_on.push(fail_on);
        self
    }

    /// Remove all failure rules.
    pub fn clear_fail_on(&self) {
        self.lock().fail_on.clear();
    }

    /// Delay every call by `latency` (builder pattern).
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    /// All recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.lock().operations.clone()
    }

    /// Recorded writes only.
    pub fn writes(&self) -> Vec<MockOperation> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.is_write())
            .cloned()
            .collect()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Write a key directly, bypassing failures and recording.
    ///
    /// Returns the new modify index. Useful for simulating writes by
    /// other clients between a read and a write.
    pub fn put_sync(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> ModifyIndex {
        let mut inner = self.lock();
        inner.index += 1;
        let index = inner.index;
        inner.keys.insert(key.into(), (value.into(), index, 0));
        ModifyIndex::new(index)
    }

    /// Read a key's value directly.
    pub fn value_sync(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().keys.get(key).map(|(v, _, _)| v.clone())
    }

    /// Current contents as key -> value, for assertions.
    pub fn dump(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock()
            .keys
            .iter()
            .map(|(k, (v, _, _))| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MockKvInner> {
        // A poisoned lock only happens after a test already panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record the call, apply latency, and return an injected failure.
    async fn enter(&self, op: MockOperation) -> Result<(), KvError> {
        let latency = {
            let mut inner = self.lock();
            inner.operations.push(op.clone());
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let inner = self.lock();
        for rule in &inner.fail_on {
            let hit = match (rule, &op) {
                (FailOn::ListUnder(e), MockOperation::ListUnder { .. })
                | (FailOn::ListKeys(e), MockOperation::ListKeys { .. })
                | (FailOn::Get(e), MockOperation::Get { .. })
                | (FailOn::Put(e), MockOperation::Put { .. })
                | (FailOn::Delete(e), MockOperation::Delete { .. }) => Some(e),
                (FailOn::PutKey(k, e), MockOperation::Put { key, .. })
                | (FailOn::DeleteKey(k, e), MockOperation::Delete { key, .. })
                    if k == key =>
                {
                    Some(e)
                }
                _ => None,
            };
            if let Some(e) = hit {
                return Err(e.clone());
            }
        }
        Ok(())
    }
}

fn check_cas(
    key: &str,
    current: Option<u64>,
    expected: Option<ModifyIndex>,
) -> Result<(), KvError> {
    let ok = match (expected, current) {
        (None, _) => true,
        (Some(e), None) => e.is_absent(),
        (Some(e), Some(index)) => e.get() == index,
    };
    if ok {
        Ok(())
    } else {
        Err(KvError::CasMismatch {
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl KvStore for MockKv {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_under(&self, prefix: &str) -> Result<Listing, KvError> {
        self.enter(MockOperation::ListUnder {
            prefix: prefix.to_string(),
        })
        .await?;

        let inner = self.lock();
        let entries = inner
            .keys
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, index, flags))| RemoteEntry {
                key: k.clone(),
                value: v.clone(),
                modify_index: ModifyIndex::new(*index),
                flags: *flags,
            })
            .collect();

        Ok(Listing {
            entries,
            index: ModifyIndex::new(inner.index),
        })
    }

    async fn list_keys(
        &self,
        prefix: &str,
        separator: Option<char>,
    ) -> Result<Vec<String>, KvError> {
        self.enter(MockOperation::ListKeys {
            prefix: prefix.to_string(),
            separator,
        })
        .await?;

        let inner = self.lock();
        let mut keys: Vec<String> = Vec::new();
        for key in inner
            .keys
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
        {
            let collapsed = match separator {
                Some(sep) => match key[prefix.len()..].find(sep) {
                    Some(pos) => key[..prefix.len() + pos + sep.len_utf8()].to_string(),
                    None => key.clone(),
                },
                None => key.clone(),
            };
            if keys.last() != Some(&collapsed) {
                keys.push(collapsed);
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, KvError> {
        self.enter(MockOperation::Get {
            key: key.to_string(),
        })
        .await?;

        let inner = self.lock();
        Ok(inner.keys.get(key).map(|(v, index, flags)| RemoteEntry {
            key: key.to_string(),
            value: v.clone(),
            modify_index: ModifyIndex::new(*index),
            flags: *flags,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &[u8],
        expected: Option<ModifyIndex>,
    ) -> Result<(), KvError> {
        self.enter(MockOperation::Put {
            key: key.to_string(),
            value: value.to_vec(),
            expected,
        })
        .await?;

        let mut inner = self.lock();
        let current = inner.keys.get(key).map(|(_, index, _)| *index);
        check_cas(key, current, expected)?;

        inner.index += 1;
        let index = inner.index;
        let flags = inner.keys.get(key).map(|(_, _, f)| *f).unwrap_or(0);
        inner.keys.insert(key.to_string(), (value.to_vec(), index, flags));
        Ok(())
    }

    async fn delete(&self, key: &str, expected: Option<ModifyIndex>) -> Result<(), KvError> {
        self.enter(MockOperation::Delete {
            key: key.to_string(),
            expected,
        })
        .await?;

        let mut inner = self.lock();
        // Consul accepts a guarded delete of a key that is already gone.
        let Some(current) = inner.keys.get(key).map(|(_, index, _)| *index) else {
            return Ok(());
        };
        check_cas(key, Some(current), expected)?;

        inner.keys.remove(key);
        inner.index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let store = MockKv::new();
        store.put("a/b", b"1", None).await.unwrap();
        let entry = store.get("a/b").await.unwrap().unwrap();
        assert_eq!(entry.value, b"1");
        assert_eq!(entry.modify_index, ModifyIndex::new(1));
        assert!(store.get("a/c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_create_only_if_absent() {
        let store = MockKv::new();
        store.put("k", b"1", Some(ModifyIndex::ABSENT)).await.unwrap();
        let err = store
            .put("k", b"2", Some(ModifyIndex::ABSENT))
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::CasMismatch { .. }));
        assert_eq!(store.value_sync("k").unwrap(), b"1");
    }

    #[tokio::test]
    async fn cas_update_with_current_index() {
        let store = MockKv::new();
        let index = store.put_sync("k", "1");
        store.put("k", b"2", Some(index)).await.unwrap();
        // The old index is now stale.
        assert!(store.put("k", b"3", Some(index)).await.is_err());
        assert_eq!(store.value_sync("k").unwrap(), b"2");
    }

    #[tokio::test]
    async fn cas_delete() {
        let store = MockKv::new();
        let index = store.put_sync("k", "1");
        assert!(store
            .delete("k", Some(ModifyIndex::new(index.get() + 5)))
            .await
            .is_err());
        store.delete("k", Some(index)).await.unwrap();
        assert!(store.is_empty());
        // Unguarded delete of a missing key is fine.
        store.delete("k", None).await.unwrap();
    }

    #[tokio::test]
    async fn cas_delete_of_missing_key_succeeds() {
        let store = MockKv::new();
        store.delete("gone", Some(ModifyIndex::new(5))).await.unwrap();
        store.delete("gone", Some(ModifyIndex::ABSENT)).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn list_under_is_string_prefix() {
        let store = MockKv::with_pairs([("app/x", "1"), ("application", "2"), ("b", "3")]);
        let listing = store.list_under("app").await.unwrap();
        let keys: Vec<_> = listing.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["app/x", "application"]);
        assert_eq!(listing.index, ModifyIndex::new(3));

        let listing = store.list_under("app/").await.unwrap();
        assert_eq!(listing.entries.len(), 1);
    }

    #[tokio::test]
    async fn list_keys_collapses_at_separator() {
        let store = MockKv::with_pairs([
            ("app/db/host", "h"),
            ("app/db/port", "p"),
            ("app/name", "n"),
            ("other", "o"),
        ]);
        let keys = store.list_keys("app/", Some('/')).await.unwrap();
        assert_eq!(keys, vec!["app/db/", "app/name"]);

        let keys = store.list_keys("app/", None).await.unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MockKv::with_pairs([("a", "1")])
            .fail_on(FailOn::PutKey("b".into(), KvError::PermissionDenied("acl".into())));

        store.put("c", b"ok", None).await.unwrap();
        let err = store.put("b", b"no", None).await.unwrap_err();
        assert!(matches!(err, KvError::PermissionDenied(_)));
        assert!(store.value_sync("b").is_none());

        store.clear_fail_on();
        store.put("b", b"ok", None).await.unwrap();
    }

    #[tokio::test]
    async fn operations_recorded() {
        let store = MockKv::new();
        store.put("a", b"1", None).await.unwrap();
        let _ = store.get("a").await.unwrap();
        store.delete("a", None).await.unwrap();

        let ops = store.operations();
        assert_eq!(ops.len(), 3);
        assert_eq!(store.writes().len(), 2);
        assert_eq!(ops[1], MockOperation::Get { key: "a".into() });
    }
}
