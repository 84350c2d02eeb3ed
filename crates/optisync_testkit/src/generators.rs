//! Property-based test generators using proptest.

use std::collections::BTreeMap;

use optisync_core::{ComparableValue, EntityKey};
use proptest::prelude::*;
use serde_json::json;

use crate::fixtures::HeaderRow;

/// Strategy for keys drawn from a small alphabet, so independently
/// generated maps overlap.
pub fn entity_key_strategy() -> impl Strategy<Value = EntityKey> {
    prop::string::string_regex("[a-f]{1,2}")
        .expect("Invalid regex")
        .prop_map(EntityKey::from)
}

/// Strategy for normalized values: small JSON objects.
pub fn comparable_value_strategy() -> impl Strategy<Value = ComparableValue> {
    (
        prop::string::string_regex("[a-z]{0,4}").expect("Invalid regex"),
        0i64..4,
        any::<bool>(),
    )
        .prop_map(|(name, size, enabled)| json!({"name": name, "size": size, "enabled": enabled}))
}

/// Strategy for snapshot maps.
pub fn snapshot_strategy() -> impl Strategy<Value = BTreeMap<EntityKey, ComparableValue>> {
    prop::collection::btree_map(entity_key_strategy(), comparable_value_strategy(), 0..12)
}

/// Strategy for `(remote, local)` snapshot pairs where the local side is
/// derived from the remote one, so every classification is likely.
pub fn snapshot_pair_strategy() -> impl Strategy<
    Value = (
        BTreeMap<EntityKey, ComparableValue>,
        BTreeMap<EntityKey, ComparableValue>,
    ),
> {
    (snapshot_strategy(), snapshot_strategy(), any::<u64>()).prop_map(|(remote, extra, salt)| {
        let mut local = BTreeMap::new();
        for (i, (key, value)) in remote.iter().enumerate() {
            match (salt >> (2 * (i % 32))) & 0b11 {
                0 => {}
                1 => {
                    local.insert(key.clone(), json!({"edited": i}));
                }
                _ => {
                    local.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, value) in extra {
            local.entry(key).or_insert(value);
        }
        (remote, local)
    })
}

/// Strategy for unsaved header rows.
pub fn header_row_strategy() -> impl Strategy<Value = HeaderRow> {
    (
        prop::string::string_regex("[A-Z][a-z]{0,7}").expect("Invalid regex"),
        prop::string::string_regex("[a-z0-9]{0,8}").expect("Invalid regex"),
    )
        .prop_map(|(name, value)| HeaderRow::new(name, value))
}

/// A user action on a header table.
#[derive(Debug, Clone)]
pub enum TableEdit {
    /// Replace the row at `index % len`.
    Edit {
        /// Row selector.
        index: usize,
        /// New value.
        row: HeaderRow,
    },
    /// Delete the row at `index % len`.
    Delete {
        /// Row selector.
        index: usize,
    },
    /// Run a pass.
    Flush,
}

/// Strategy for sequences of table edits.
pub fn table_edits_strategy(max_len: usize) -> impl Strategy<Value = Vec<TableEdit>> {
    let edit = prop_oneof![
        4 => (any::<usize>(), header_row_strategy())
            .prop_map(|(index, row)| TableEdit::Edit { index, row }),
        1 => any::<usize>().prop_map(|index| TableEdit::Delete { index }),
        2 => Just(TableEdit::Flush),
    ];
    prop::collection::vec(edit, 1..max_len)
}
