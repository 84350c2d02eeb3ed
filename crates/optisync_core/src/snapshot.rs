//! Collection snapshots.

use std::collections::BTreeMap;

use crate::entity::{ComparableValue, Entity, EntityKey};

/// Point-in-time view of a collection: key → normalized value.
pub type SnapshotMap = BTreeMap<EntityKey, ComparableValue>;

/// Builds a snapshot map from an ordered list of entities.
///
/// If two entities share a key the later one wins, matching how a keyed
/// view of the list would resolve it.
pub fn snapshot_map<'a, T, I>(items: I) -> SnapshotMap
where
    T: Entity,
    I: IntoIterator<Item = &'a T>,
{
    items
        .into_iter()
        .map(|item| (item.key(), item.normalize()))
        .collect()
}
