//! Property-based tests for key paths, diffing and planning.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::BTreeMap;

use proptest::prelude::*;

use consulkv::core::{Environment, KeyEntry, KeyPath, ModifyIndex};
use consulkv::engine::{
    diff, ConflictPolicy, DiffDirection, DiffEntry, Executor, PlanError, SnapshotLoader,
    Snapshot, SyncDirection, SyncPlanner, SyncPolicy,
};
use consulkv::kv::mock::MockKv;

/// Strategy for path segments, including characters that need escaping.
fn segment() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            prop::char::range('a', 'z'),
            prop::char::range('0', '9'),
            Just('-'),
            Just('.'),
            Just('/'),
            Just('\\'),
        ],
        1..8,
    )
    .prop_map(|chars| chars.into_iter().collect())
}

/// Strategy for storable segments (no separator).
fn plain_segment() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9._-]{0,6}"
}

/// Strategy for a small key/value tree, as relative path -> value.
fn tree() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..4)
            .prop_map(|segments| segments.join("/")),
        "[a-z0-9]{0,4}",
        0..8,
    )
    .prop_filter("no key may be a prefix folder of another", |map| {
        map.keys()
            .all(|k| !map.keys().any(|other| other.starts_with(&format!("{}/", k))))
    })
}

fn snapshot(name: &str, tree: &BTreeMap<String, String>) -> Snapshot {
    Snapshot::new(
        name,
        tree.iter().enumerate().map(|(i, (k, v))| {
            KeyEntry::new(
                KeyPath::parse(k).unwrap(),
                v.as_bytes(),
                ModifyIndex::new(i as u64 + 1),
            )
        }),
        ModifyIndex::new(tree.len() as u64),
    )
}

fn mirrored(entry: &DiffEntry<'_>) -> String {
    match entry {
        DiffEntry::Added(e) => format!("removed {}", e.path),
        DiffEntry::Removed(e) => format!("added {}", e.path),
        DiffEntry::Changed { old, new } => format!("changed {} {:?}->{:?}", new.path, new.value, old.value),
        DiffEntry::Unchanged(p) => format!("unchanged {}", p),
    }
}

fn described(entry: &DiffEntry<'_>) -> String {
    match entry {
        DiffEntry::Added(e) => format!("added {}", e.path),
        DiffEntry::Removed(e) => format!("removed {}", e.path),
        DiffEntry::Changed { old, new } => format!("changed {} {:?}->{:?}", new.path, old.value, new.value),
        DiffEntry::Unchanged(p) => format!("unchanged {}", p),
    }
}

proptest! {
    /// Display then parse gives back the same path.
    #[test]
    fn path_display_roundtrip(segments in prop::collection::vec(segment(), 0..5)) {
        let path = KeyPath::from_segments(segments).unwrap();
        let reparsed = KeyPath::parse(&path.to_string()).unwrap();
        prop_assert_eq!(&reparsed, &path);
        prop_assert_eq!(KeyPath::parse(&reparsed.to_string()).unwrap(), reparsed);
    }

    /// Paths without separators in segments survive the store key form.
    #[test]
    fn path_store_key_roundtrip(segments in prop::collection::vec(plain_segment(), 1..5)) {
        let path = KeyPath::from_segments(segments).unwrap();
        let key = path.to_store_key().unwrap();
        prop_assert_eq!(KeyPath::from_store_key(&key).unwrap(), path);
    }

    /// Reversing direction swaps added/removed and old/new.
    #[test]
    fn diff_reversal_mirrors(a in tree(), b in tree()) {
        let (a, b) = (snapshot("a", &a), snapshot("b", &b));
        let forward: Vec<String> = diff(&a, &b, DiffDirection::SourceToTarget).map(|e| mirrored(&e)).collect();
        let backward: Vec<String> = diff(&a, &b, DiffDirection::TargetToSource).map(|e| described(&e)).collect();
        prop_assert_eq!(forward, backward);
    }

    /// Diff output is ordered by path with no duplicates.
    #[test]
    fn diff_is_ordered(a in tree(), b in tree()) {
        let (a, b) = (snapshot("a", &a), snapshot("b", &b));
        let paths: Vec<KeyPath> = diff(&a, &b, DiffDirection::SourceToTarget).map(|e| e.path().clone()).collect();
        prop_assert!(paths.windows(2).all(|w| w[0] < w[1]));
    }

    /// Two-way abort fails iff some path changed on both sides.
    #[test]
    fn two_way_abort_on_double_edit(base in tree(), edit in "[a-z]{1,3}") {
        prop_assume!(!base.is_empty());
        let key = base.keys().next().unwrap().clone();
        let mut source = base.clone();
        let mut target = base.clone();
        source.insert(key.clone(), format!("s-{}", edit));
        target.insert(key.clone(), format!("t-{}", edit));

        let planner = SyncPlanner::new(SyncPolicy {
            direction: SyncDirection::TwoWay,
            on_conflict: ConflictPolicy::Abort,
            ..SyncPolicy::default()
        });
        let baseline = snapshot("dev", &base);
        let result = planner.plan(&snapshot("dev", &source), &snapshot("prod", &target), Some(&baseline));
        match result {
            Err(PlanError::SyncConflict { paths }) => {
                prop_assert_eq!(paths, vec![KeyPath::parse(&key).unwrap()]);
            }
            other => prop_assert!(false, "expected conflict, got {:?}", other),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Applying a pruning one-way plan makes the target equal the source.
    #[test]
    fn prune_plan_converges(source in tree(), target in tree()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = MockKv::with_pairs(
            source
                .iter()
                .map(|(k, v)| (format!("dev/{}", k), v.clone()))
                .chain(target.iter().map(|(k, v)| (format!("prod/{}", k), v.clone()))),
        );
        let dev = Environment::new("dev", KeyPath::parse("dev").unwrap());
        let prod = Environment::new("prod", KeyPath::parse("prod").unwrap());

        let converged = runtime.block_on(async {
            let loader = SnapshotLoader::new(&store);
            let a = loader.load(&dev).await.unwrap();
            let b = loader.load(&prod).await.unwrap();

            let plan = SyncPlanner::new(SyncPolicy {
                prune: true,
                ..SyncPolicy::default()
            })
            .plan(&a, &b, None)
            .unwrap();
            let result = Executor::new(&store, &prod).execute(plan.to_target).await.unwrap();
            assert!(result.is_success());

            let b = loader.load(&prod).await.unwrap();
            a.same_contents(&b)
        });
        prop_assert!(converged);
    }
}
