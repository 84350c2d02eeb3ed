//! Observable ordered collection.
//!
//! The editor patches entities directly through this collection; the
//! reconciliation engine subscribes to it to learn about those edits and
//! patches it back when the remote assigns identifiers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let rows = ObservableCollection::new(vec![HeaderRow::blank()]);
//!
//! let id = rows.subscribe(Arc::new(|change: &CollectionChange| {
//!     println!("row {} changed: {:?}", change.index, change.kind);
//! }));
//!
//! rows.update(0, |row| row.key = "Accept".into())?;
//! rows.unsubscribe(id);
//! ```
//!
//! Listeners run synchronously on the mutating thread after the internal
//! lock is released, so a listener may read (or even patch) the collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entity::{Entity, EntityKey};
use crate::error::{CoreError, CoreResult};

/// Kind of change applied to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An entity was inserted at `index`.
    Inserted,
    /// The entity at `index` was replaced or patched.
    Updated,
    /// The entity previously at `index` was removed.
    Removed,
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    /// Position affected by the change.
    pub index: usize,
    /// Key of the entity after the change (before it, for removals).
    pub key: EntityKey,
    /// Type of change.
    pub kind: ChangeKind,
}

/// Change listener.
pub type Listener = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Handle returned by [`ObservableCollection::subscribe`].
pub type ListenerId = u64;

struct Shared<T> {
    items: RwLock<Vec<T>>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// A subscribable, ordered list of entities.
///
/// Cloning yields another handle to the same list.
pub struct ObservableCollection<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ObservableCollection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Entity> ObservableCollection<T> {
    /// Creates a collection holding `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                items: RwLock::new(items),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.shared.items.read().len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.items.read().is_empty()
    }

    /// Returns a copy of the entity at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.shared.items.read().get(index).cloned()
    }

    /// Returns the position of the first entity with `key`.
    pub fn position(&self, key: &EntityKey) -> Option<usize> {
        self.shared.items.read().iter().position(|item| &item.key() == key)
    }

    /// Returns the position and a copy of the first entity with `key`.
    pub fn find(&self, key: &EntityKey) -> Option<(usize, T)> {
        self.shared
            .items
            .read()
            .iter()
            .enumerate()
            .find(|(_, item)| &item.key() == key)
            .map(|(index, item)| (index, item.clone()))
    }

    /// Returns a copy of all entities in order.
    pub fn items(&self) -> Vec<T> {
        self.shared.items.read().clone()
    }

    /// Replaces the entity at `index`.
    pub fn set(&self, index: usize, item: T) -> CoreResult<()> {
        self.update(index, move |slot| *slot = item)
    }

    /// Patches the entity at `index` in place.
    pub fn update(&self, index: usize, patch: impl FnOnce(&mut T)) -> CoreResult<()> {
        let key = {
            let mut items = self.shared.items.write();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(CoreError::IndexOutOfBounds { index, len })?;
            patch(slot);
            slot.key()
        };
        self.notify(CollectionChange {
            index,
            key,
            kind: ChangeKind::Updated,
        });
        Ok(())
    }

    /// Patches the first entity with `key` in place, returning its index.
    pub fn update_by_key(&self, key: &EntityKey, patch: impl FnOnce(&mut T)) -> CoreResult<usize> {
        let index = self
            .position(key)
            .ok_or_else(|| CoreError::UnknownKey(key.clone()))?;
        self.update(index, patch)?;
        Ok(index)
    }

    /// Appends an entity and returns its index.
    pub fn push(&self, item: T) -> usize {
        let (index, key) = {
            let mut items = self.shared.items.write();
            let key = item.key();
            items.push(item);
            (items.len() - 1, key)
        };
        self.notify(CollectionChange {
            index,
            key,
            kind: ChangeKind::Inserted,
        });
        index
    }

    /// Removes and returns the entity at `index`.
    pub fn remove(&self, index: usize) -> CoreResult<T> {
        let removed = {
            let mut items = self.shared.items.write();
            let len = items.len();
            if index >= len {
                return Err(CoreError::IndexOutOfBounds { index, len });
            }
            items.remove(index)
        };
        self.notify(CollectionChange {
            index,
            key: removed.key(),
            kind: ChangeKind::Removed,
        });
        Ok(removed)
    }

    /// Removes every entity for which `keep` returns false.
    ///
    /// One `Removed` notification is emitted per entity, carrying the index
    /// it had at the moment of its removal.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
        let (removed, changes) = {
            let mut items = self.shared.items.write();
            let mut removed = Vec::new();
            let mut changes = Vec::new();
            let mut index = 0;
            while index < items.len() {
                if keep(&items[index]) {
                    index += 1;
                } else {
                    let item = items.remove(index);
                    changes.push(CollectionChange {
                        index,
                        key: item.key(),
                        kind: ChangeKind::Removed,
                    });
                    removed.push(item);
                }
            }
            (removed, changes)
        };
        for change in changes {
            self.notify(change);
        }
        removed
    }

    /// Registers a listener for future changes.
    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.write().push((id, listener));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    fn notify(&self, change: CollectionChange) {
        // Snapshot so listeners can subscribe/unsubscribe re-entrantly.
        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }
}

impl<T: Entity> Default for ObservableCollection<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identifier;
    use parking_lot::Mutex;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Param {
        id: Identifier,
        name: String,
    }

    impl Entity for Param {
        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn set_identifier(&mut self, id: Identifier) {
            self.id = id;
        }
    }

    fn param(name: &str) -> Param {
        Param {
            id: Identifier::generate(),
            name: name.into(),
        }
    }

    fn recorder(collection: &ObservableCollection<Param>) -> Arc<Mutex<Vec<CollectionChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        collection.subscribe(Arc::new(move |change: &CollectionChange| {
            sink.lock().push(change.clone());
        }));
        seen
    }

    #[test]
    fn update_notifies_with_new_key() {
        let rows = ObservableCollection::new(vec![Param {
            id: Identifier::empty(),
            name: "page".into(),
        }]);
        let seen = recorder(&rows);

        let id = Identifier::generate();
        rows.update(0, |row| row.set_identifier(id)).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, EntityKey::from(id));
        assert_eq!(seen[0].kind, ChangeKind::Updated);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let rows = ObservableCollection::new(vec![param("a")]);
        assert_eq!(
            rows.set(3, param("b")),
            Err(CoreError::IndexOutOfBounds { index: 3, len: 1 })
        );
        assert!(rows.remove(1).is_err());
    }

    #[test]
    fn push_and_remove_notify() {
        let rows = ObservableCollection::default();
        let seen = recorder(&rows);

        let index = rows.push(param("a"));
        assert_eq!(index, 0);
        let removed = rows.remove(0).unwrap();
        assert_eq!(removed.name, "a");

        let kinds: Vec<_> = seen.lock().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Inserted, ChangeKind::Removed]);
    }

    #[test]
    fn find_by_key() {
        let a = param("a");
        let b = param("b");
        let rows = ObservableCollection::new(vec![a.clone(), b.clone()]);
        assert_eq!(rows.find(&b.key()), Some((1, b.clone())));
        assert_eq!(rows.position(&EntityKey::from("missing")), None);

        let index = rows
            .update_by_key(&a.key(), |row| row.name = "z".into())
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(rows.get(0).unwrap().name, "z");
    }

    #[test]
    fn retain_reports_each_removal() {
        let rows = ObservableCollection::new(vec![param("a"), param("b"), param("c")]);
        let seen = recorder(&rows);

        let removed = rows.retain(|p| p.name == "b");
        assert_eq!(removed.len(), 2);
        assert_eq!(rows.len(), 1);

        let indices: Vec<_> = seen.lock().iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn listener_may_read_collection() {
        let rows = ObservableCollection::new(vec![param("a")]);
        let reader = rows.clone();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        rows.subscribe(Arc::new(move |change: &CollectionChange| {
            *sink.lock() = reader.get(change.index).map(|p| p.name);
        }));

        rows.update(0, |p| p.name = "b".into()).unwrap();
        assert_eq!(observed.lock().as_deref(), Some("b"));
    }

    #[test]
    fn unsubscribe() {
        let rows = ObservableCollection::new(vec![param("a")]);
        let id = rows.subscribe(Arc::new(|_: &CollectionChange| {}));
        assert_eq!(rows.listener_count(), 1);
        assert!(rows.unsubscribe(id));
        assert!(!rows.unsubscribe(id));
        assert_eq!(rows.listener_count(), 0);
    }
}
