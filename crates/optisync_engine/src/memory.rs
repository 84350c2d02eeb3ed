//! In-memory remote store.
//!
//! Used by tests and by the replay CLI. Every call is appended to a
//! [`CallLog`] that can be shared between several remotes, so the relative
//! order of node and edge calls is observable.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use optisync_core::{ComparableValue, Entity, EntityKey, Identifier};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::error::{SyncError, SyncResult};
use crate::remote::EntityRemote;

/// Kind of remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOp {
    /// Create call.
    Create,
    /// Update call.
    Update,
    /// Delete call.
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RemoteOp::Create => "create",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
        })
    }
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCall {
    /// Name of the remote collection.
    pub collection: String,
    /// Operation.
    pub op: RemoteOp,
    /// Tracking key of the entity at call time.
    pub key: EntityKey,
    /// Identifier after the call (issued identifier for creates).
    pub identifier: Identifier,
    /// Normalized payload sent.
    pub payload: ComparableValue,
    /// Whether the call succeeded.
    pub ok: bool,
}

/// Shared, ordered log of remote calls in completion order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<RemoteCall>>>,
}

impl CallLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded calls.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// Returns `(collection, op)` pairs, convenient for order assertions.
    pub fn ops(&self) -> Vec<(String, RemoteOp)> {
        self.calls
            .lock()
            .iter()
            .map(|call| (call.collection.clone(), call.op))
            .collect()
    }

    /// Number of recorded calls.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Forgets all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }
}

/// An in-memory [`EntityRemote`] that issues generated identifiers.
///
/// Supports injected failures ([`MemoryRemote::fail_next`]) and an optional
/// gate that holds every call until [`MemoryRemote::release`] is called.
pub struct MemoryRemote<T> {
    collection: String,
    log: CallLog,
    store: Mutex<BTreeMap<Identifier, T>>,
    failures: AtomicUsize,
    gate: Option<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl<T: Entity> MemoryRemote<T> {
    /// Creates a remote with its own call log.
    pub fn new(collection: impl Into<String>) -> Self {
        Self::with_log(collection, CallLog::new())
    }

    /// Creates a remote recording into a shared call log.
    pub fn with_log(collection: impl Into<String>, log: CallLog) -> Self {
        Self {
            collection: collection.into(),
            log,
            store: Mutex::new(BTreeMap::new()),
            failures: AtomicUsize::new(0),
            gate: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Holds every call until permits are released.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Lets `calls` held calls complete. No-op when not gated.
    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Makes the next `count` calls fail with a retryable error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Pre-populates the store with already persisted entities.
    pub fn seed(&self, entities: impl IntoIterator<Item = T>) {
        let mut store = self.store.lock();
        for entity in entities {
            store.insert(*entity.identifier(), entity);
        }
    }

    /// The call log this remote records into.
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Returns the stored entity with `id`.
    pub fn get(&self, id: &Identifier) -> Option<T> {
        self.store.lock().get(id).cloned()
    }

    /// Returns all stored entities in identifier order.
    pub fn contents(&self) -> Vec<T> {
        self.store.lock().values().cloned().collect()
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Calls started and not yet finished, including calls held at the gate.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls ever outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> SyncResult<InFlight<'_>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight {
            counter: &self.in_flight,
        };
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SyncError::remote_fatal("gate closed"))?
                .forget();
        }
        Ok(guard)
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record(&self, op: RemoteOp, entity: &T, identifier: Identifier, ok: bool) {
        self.log.record(RemoteCall {
            collection: self.collection.clone(),
            op,
            key: entity.key(),
            identifier,
            payload: entity.normalize(),
            ok,
        });
    }

    fn injected(&self, op: RemoteOp, entity: &T) -> SyncError {
        self.record(op, entity, *entity.identifier(), false);
        SyncError::remote_retryable(format!("injected {op} failure on {}", self.collection))
    }
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<T: Entity> EntityRemote<T> for MemoryRemote<T> {
    async fn create(&self, entity: &T) -> SyncResult<Identifier> {
        let _flight = self.enter().await?;
        if self.take_failure() {
            return Err(self.injected(RemoteOp::Create, entity));
        }
        let id = Identifier::generate();
        let mut stored = entity.clone();
        stored.set_identifier(id);
        self.store.lock().insert(id, stored);
        self.record(RemoteOp::Create, entity, id, true);
        Ok(id)
    }

    async fn update(&self, entity: &T) -> SyncResult<()> {
        let _flight = self.enter().await?;
        if self.take_failure() {
            return Err(self.injected(RemoteOp::Update, entity));
        }
        let id = *entity.identifier();
        let known = {
            let mut store = self.store.lock();
            match store.get_mut(&id) {
                Some(slot) => {
                    *slot = entity.clone();
                    true
                }
                None => false,
            }
        };
        self.record(RemoteOp::Update, entity, id, known);
        if known {
            Ok(())
        } else {
            Err(SyncError::remote_fatal(format!(
                "{} has no entity {id:?}",
                self.collection
            )))
        }
    }

    async fn delete(&self, entity: &T) -> SyncResult<()> {
        let _flight = self.enter().await?;
        if self.take_failure() {
            return Err(self.injected(RemoteOp::Delete, entity));
        }
        let id = *entity.identifier();
        let known = self.store.lock().remove(&id).is_some();
        self.record(RemoteOp::Delete, entity, id, known);
        if known {
            Ok(())
        } else {
            Err(SyncError::remote_fatal(format!(
                "{} has no entity {id:?}",
                self.collection
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Variable {
        id: Identifier,
        name: String,
    }

    impl Entity for Variable {
        fn identifier(&self) -> &Identifier {
            &self.id
        }

        fn set_identifier(&mut self, id: Identifier) {
            self.id = id;
        }
    }

    fn variable(name: &str) -> Variable {
        Variable {
            id: Identifier::empty(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn create_update_delete() {
        let remote = MemoryRemote::new("variables");
        let mut var = variable("host");

        let id = remote.create(&var).await.unwrap();
        assert!(!id.is_empty());
        var.set_identifier(id);
        assert_eq!(remote.get(&id).unwrap(), var);

        var.name = "hostname".into();
        remote.update(&var).await.unwrap();
        assert_eq!(remote.get(&id).unwrap().name, "hostname");

        remote.delete(&var).await.unwrap();
        assert!(remote.is_empty());

        let ops: Vec<_> = remote.log().ops().into_iter().map(|(_, op)| op).collect();
        assert_eq!(ops, vec![RemoteOp::Create, RemoteOp::Update, RemoteOp::Delete]);
        assert_eq!(remote.log().calls()[0].payload, json!({"name": "host"}));
    }

    #[tokio::test]
    async fn update_unknown_fails() {
        let remote = MemoryRemote::new("variables");
        let mut var = variable("x");
        var.set_identifier(Identifier::generate());

        let err = remote.update(&var).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(!remote.log().calls()[0].ok);
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MemoryRemote::new("variables");
        remote.fail_next(1);

        let err = remote.create(&variable("a")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(remote.create(&variable("a")).await.is_ok());
        assert_eq!(remote.len(), 1);
        assert_eq!(remote.log().len(), 2);
    }

    #[tokio::test]
    async fn shared_log_orders_across_remotes() {
        let log = CallLog::new();
        let nodes = MemoryRemote::with_log("nodes", log.clone());
        let edges = MemoryRemote::with_log("edges", log.clone());

        nodes.create(&variable("n")).await.unwrap();
        edges.create(&variable("e")).await.unwrap();

        assert_eq!(
            log.ops(),
            vec![
                ("nodes".to_string(), RemoteOp::Create),
                ("edges".to_string(), RemoteOp::Create)
            ]
        );
    }

    #[tokio::test]
    async fn gate_holds_calls() {
        let remote = Arc::new(MemoryRemote::new("variables").gated());
        let pending = {
            let remote = Arc::clone(&remote);
            tokio::spawn(async move { remote.create(&variable("a")).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(remote.in_flight(), 1);
        assert!(remote.log().is_empty());

        remote.release(1);
        pending.await.unwrap().unwrap();
        assert_eq!(remote.in_flight(), 0);
        assert_eq!(remote.max_in_flight(), 1);
        assert_eq!(remote.log().len(), 1);
    }
}
