//! Entity trait, tracking keys and normalized values.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Identifier;

/// Normalized value used to compare two snapshots of the same entity.
///
/// Identity and transient UI fields are stripped before comparison.
pub type ComparableValue = Value;

/// Key under which an entity is tracked by the reconciliation engine.
///
/// Plain rows are keyed by the canonical string of their identifier, so
/// every unsaved row shares the empty key. Entities with a stable local
/// handle (delta rows, graph nodes and edges) key by that handle instead.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Creates a key from any string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key shared by all unsaved plain rows.
    #[must_use]
    pub fn unsaved() -> Self {
        Self(String::new())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_unsaved(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({:?})", self.0)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Identifier> for EntityKey {
    fn from(id: &Identifier) -> Self {
        Self(id.to_string())
    }
}

impl From<Identifier> for EntityKey {
    fn from(id: Identifier) -> Self {
        Self::from(&id)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// A record that can be reconciled with a remote store.
///
/// Implementors only need to expose their identifier. Normalization
/// defaults to the serde representation minus [`Entity::IDENTITY_FIELD`]
/// and [`Entity::TRANSIENT_FIELDS`] (serialized field names).
pub trait Entity: Serialize + Clone + Send + Sync + 'static {
    /// Serialized name of the identifier field.
    const IDENTITY_FIELD: &'static str = "id";

    /// Serialized names of UI-only fields excluded from comparison.
    const TRANSIENT_FIELDS: &'static [&'static str] = &[];

    /// Returns the remote identifier, empty until created.
    fn identifier(&self) -> &Identifier;

    /// Attaches or clears the remote identifier.
    fn set_identifier(&mut self, id: Identifier);

    /// Returns the tracking key.
    fn key(&self) -> EntityKey {
        EntityKey::from(self.identifier())
    }

    /// Returns true if the entity has not been created remotely.
    fn is_unsaved(&self) -> bool {
        self.identifier().is_empty()
    }

    /// Returns the comparable value of this entity.
    fn normalize(&self) -> ComparableValue {
        normalize_serialized(self, Self::IDENTITY_FIELD, Self::TRANSIENT_FIELDS)
    }
}

/// Serializes `entity` and strips the identity and transient fields.
///
/// Non-object representations are returned as serialized.
pub fn normalize_serialized<T: Serialize + ?Sized>(
    entity: &T,
    identity_field: &str,
    transient_fields: &[&str],
) -> ComparableValue {
    match serde_json::to_value(entity) {
        Ok(Value::Object(mut map)) => {
            map.remove(identity_field);
            for field in transient_fields {
                map.remove(*field);
            }
            Value::Object(map)
        }
        Ok(other) => other,
        Err(err) => {
            tracing::error!(%err, "entity is not representable as JSON, comparing as null");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize)]
    struct Header {
        id: Identifier,
        key: String,
        value: String,
        #[serde(rename = "isHovered")]
        hovered: bool,
    }

    impl Entity for Header {
        const TRANSIENT_FIELDS: &'static [&'static str] = &["isHovered"];

        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn set_identifier(&mut self, id: Identifier) {
            self.id = id;
        }
    }

    fn header(key: &str) -> Header {
        Header {
            id: Identifier::empty(),
            key: key.into(),
            value: "v".into(),
            hovered: false,
        }
    }

    #[test]
    fn normalize_strips_identity_and_transient_fields() {
        let mut row = header("Accept");
        row.id = Identifier::generate();
        row.hovered = true;
        assert_eq!(row.normalize(), json!({"key": "Accept", "value": "v"}));
    }

    #[test]
    fn identity_does_not_affect_comparison() {
        let unsaved = header("Accept");
        let mut saved = unsaved.clone();
        saved.set_identifier(Identifier::generate());
        assert_eq!(unsaved.normalize(), saved.normalize());
    }

    #[test]
    fn unsaved_rows_share_the_empty_key() {
        let row = header("a");
        assert!(row.is_unsaved());
        assert_eq!(row.key(), EntityKey::unsaved());
        assert!(row.key().is_unsaved());
    }

    #[test]
    fn saved_rows_key_by_identifier() {
        let mut row = header("a");
        let id = Identifier::generate();
        row.set_identifier(id);
        assert!(!row.is_unsaved());
        assert_eq!(row.key().as_str(), id.to_string());
    }

    #[test]
    fn non_object_values_pass_through() {
        assert_eq!(normalize_serialized(&42u32, "id", &[]), json!(42));
    }
}
