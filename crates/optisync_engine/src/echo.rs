//! Echo suppression.
//!
//! The engine writes back to the same observable collection the editor
//! writes to (attaching identifiers, removing deleted rows, restoring
//! parent values). Those writes fire the same change notifications as a
//! user edit. Running them inside [`EchoGuard::item_transaction`] marks the
//! key as ignored for the synchronous extent of the write, so the change
//! subscriber drops the notification instead of queueing a phantom edit.

use std::collections::HashMap;

use optisync_core::EntityKey;
use parking_lot::Mutex;

/// Ignore set shared by a collection's change subscriber and its writer.
#[derive(Debug, Default)]
pub struct EchoGuard {
    ignored: Mutex<HashMap<EntityKey, usize>>,
}

impl EchoGuard {
    /// Creates an empty guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `mutate` with `key` suppressed.
    ///
    /// Transactions on the same key may nest. The key is released even if
    /// `mutate` panics.
    pub fn item_transaction<R>(&self, key: &EntityKey, mutate: impl FnOnce() -> R) -> R {
        *self.ignored.lock().entry(key.clone()).or_insert(0) += 1;
        let _release = Release { guard: self, key };
        mutate()
    }

    /// Returns true if notifications for `key` must be dropped.
    pub fn is_suppressed(&self, key: &EntityKey) -> bool {
        self.ignored.lock().contains_key(key)
    }

    /// Returns true if no transaction is active.
    pub fn is_idle(&self) -> bool {
        self.ignored.lock().is_empty()
    }
}

struct Release<'a> {
    guard: &'a EchoGuard,
    key: &'a EntityKey,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut ignored = self.guard.ignored.lock();
        if let Some(depth) = ignored.get_mut(self.key) {
            *depth -= 1;
            if *depth == 0 {
                ignored.remove(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn suppressed_only_inside_transaction() {
        let guard = EchoGuard::new();
        let key = EntityKey::from("row");
        assert!(!guard.is_suppressed(&key));

        let inside = guard.item_transaction(&key, || guard.is_suppressed(&key));
        assert!(inside);
        assert!(!guard.is_suppressed(&key));
        assert!(guard.is_idle());
    }

    #[test]
    fn other_keys_are_not_suppressed() {
        let guard = EchoGuard::new();
        let a = EntityKey::from("a");
        let b = EntityKey::from("b");
        guard.item_transaction(&a, || assert!(!guard.is_suppressed(&b)));
    }

    #[test]
    fn nested_transactions_on_same_key() {
        let guard = EchoGuard::new();
        let key = EntityKey::unsaved();
        guard.item_transaction(&key, || {
            guard.item_transaction(&key, || assert!(guard.is_suppressed(&key)));
            assert!(guard.is_suppressed(&key));
        });
        assert!(guard.is_idle());
    }

    #[test]
    fn released_on_panic() {
        let guard = EchoGuard::new();
        let key = EntityKey::from("row");
        let result = catch_unwind(AssertUnwindSafe(|| {
            guard.item_transaction(&key, || panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(guard.is_idle());
    }
}
