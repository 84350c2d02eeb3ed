//! Diff classification between a remote and a local snapshot.
//!
//! Given the last known remote snapshot and the current local snapshot,
//! every key in their union lands in exactly one bucket:
//!
//! | remote  | local   | bucket |
//! |---------|---------|--------|
//! | absent  | present | create |
//! | present | absent  | delete |
//! | equal   | equal   | ignore |
//! | differs | differs | update |
//!
//! Classification is pure. Ordering of the resulting operations is the
//! consumer's business.

use std::collections::{BTreeMap, BTreeSet};

use crate::entity::EntityKey;

/// Bucket assigned to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Present locally only.
    Create,
    /// Present on both sides with different values.
    Update,
    /// Present remotely only.
    Delete,
    /// Present on both sides with equal values.
    Ignore,
}

/// Keys partitioned by classification, each list in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffPlan {
    /// Keys to create remotely.
    pub creates: Vec<EntityKey>,
    /// Keys to update remotely.
    pub updates: Vec<EntityKey>,
    /// Keys to delete remotely.
    pub deletes: Vec<EntityKey>,
    /// Keys already in sync.
    pub ignored: Vec<EntityKey>,
}

impl DiffPlan {
    /// Returns true if no remote operation is needed.
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Number of remote operations the plan calls for.
    pub fn operation_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Returns the bucket of `key`, or `None` if it was in neither snapshot.
    pub fn classification_of(&self, key: &EntityKey) -> Option<Classification> {
        [
            (&self.creates, Classification::Create),
            (&self.updates, Classification::Update),
            (&self.deletes, Classification::Delete),
            (&self.ignored, Classification::Ignore),
        ]
        .into_iter()
        .find(|(keys, _)| keys.binary_search(key).is_ok())
        .map(|(_, class)| class)
    }
}

/// Classifies one key from its remote and local values.
///
/// Returns `None` only when the key is absent from both sides.
pub fn classify_key<V: PartialEq>(remote: Option<&V>, local: Option<&V>) -> Option<Classification> {
    match (remote, local) {
        (None, Some(_)) => Some(Classification::Create),
        (Some(_), None) => Some(Classification::Delete),
        (Some(r), Some(l)) if r == l => Some(Classification::Ignore),
        (Some(_), Some(_)) => Some(Classification::Update),
        (None, None) => None,
    }
}

/// Partitions the union of both maps' keys into create/update/delete/ignore.
pub fn classify<V: PartialEq>(
    remote: &BTreeMap<EntityKey, V>,
    local: &BTreeMap<EntityKey, V>,
) -> DiffPlan {
    let keys: BTreeSet<&EntityKey> = remote.keys().chain(local.keys()).collect();
    let mut plan = DiffPlan::default();

    for key in keys {
        let bucket = match classify_key(remote.get(key), local.get(key)) {
            Some(Classification::Create) => &mut plan.creates,
            Some(Classification::Update) => &mut plan.updates,
            Some(Classification::Delete) => &mut plan.deletes,
            Some(Classification::Ignore) => &mut plan.ignored,
            None => continue,
        };
        bucket.push(key.clone());
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    fn map(entries: &[(&str, Value)]) -> BTreeMap<EntityKey, Value> {
        entries
            .iter()
            .map(|(k, v)| (EntityKey::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn four_rules() {
        let remote = map(&[
            ("kept", json!({"v": 1})),
            ("changed", json!({"v": 1})),
            ("removed", json!({"v": 1})),
        ]);
        let local = map(&[
            ("kept", json!({"v": 1})),
            ("changed", json!({"v": 2})),
            ("added", json!({"v": 1})),
        ]);

        let plan = classify(&remote, &local);
        assert_eq!(plan.creates, vec![EntityKey::from("added")]);
        assert_eq!(plan.updates, vec![EntityKey::from("changed")]);
        assert_eq!(plan.deletes, vec![EntityKey::from("removed")]);
        assert_eq!(plan.ignored, vec![EntityKey::from("kept")]);
        assert_eq!(plan.operation_count(), 3);
    }

    #[test]
    fn nested_values_compare_deeply() {
        let remote = map(&[("a", json!({"headers": [{"k": "x"}]}))]);
        let local = map(&[("a", json!({"headers": [{"k": "x"}]}))]);
        assert!(classify(&remote, &local).is_noop());

        let local = map(&[("a", json!({"headers": [{"k": "y"}]}))]);
        assert_eq!(classify(&remote, &local).updates.len(), 1);
    }

    #[test]
    fn empty_maps_yield_empty_plan() {
        let plan = classify::<Value>(&BTreeMap::new(), &BTreeMap::new());
        assert_eq!(plan, DiffPlan::default());
        assert!(plan.is_noop());
    }

    #[test]
    fn classify_key_absent_both() {
        assert_eq!(classify_key::<u8>(None, None), None);
    }

    fn arb_map() -> impl Strategy<Value = BTreeMap<EntityKey, u8>> {
        prop::collection::btree_map("[a-e]{1,2}".prop_map(EntityKey::from), 0u8..3, 0..12)
    }

    proptest! {
        #[test]
        fn every_key_lands_in_exactly_one_bucket(remote in arb_map(), local in arb_map()) {
            let plan = classify(&remote, &local);
            let union: BTreeSet<_> = remote.keys().chain(local.keys()).cloned().collect();

            let total = plan.creates.len() + plan.updates.len()
                + plan.deletes.len() + plan.ignored.len();
            prop_assert_eq!(total, union.len());

            for key in &union {
                let expected = classify_key(remote.get(key), local.get(key));
                prop_assert_eq!(plan.classification_of(key), expected);
            }
        }

        #[test]
        fn equal_maps_are_ignored_indefinitely(snapshot in arb_map()) {
            for _ in 0..3 {
                let plan = classify(&snapshot, &snapshot);
                prop_assert!(plan.is_noop());
                prop_assert_eq!(plan.ignored.len(), snapshot.len());
            }
        }
    }
}
