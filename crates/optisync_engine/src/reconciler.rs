//! Graph reconciler.
//!
//! Nodes and edges are reconciled against the last values the remote
//! received (the baseline) in dependency-safe phases:
//!
//! 1. create nodes
//! 2. create edges
//! 3. update nodes
//! 4. update edges
//! 5. delete edges
//! 6. delete nodes
//!
//! Every phase runs its calls concurrently and is fully awaited before the
//! next one starts, so an edge is never sent before its endpoints exist and
//! a node is never deleted while an edge still references it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use optisync_core::{
    classify, snapshot_map, CollectionChange, CoreError, DiffPlan, Entity, EntityKey, Identifier,
    ListenerId,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ReconcilerConfig;
use crate::echo::EchoGuard;
use crate::error::{SyncError, SyncResult};
use crate::graph::{FlowGraph, GraphEdge};
use crate::remote::GraphRemote;
use crate::schedule::{Debouncer, SingleFlight};
use crate::stats::{CallOutcome, FlushOutcome, FlushReport, Phase, PhaseReport, ReconcileStats};

/// Entities as the remote last received them, by key.
struct Baseline<N, E> {
    nodes: BTreeMap<EntityKey, N>,
    edges: BTreeMap<EntityKey, E>,
}

impl<N: Clone, E: Clone> Clone for Baseline<N, E> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }
}

/// Pending node and edge operations relative to the baseline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphPlan {
    /// Node classification.
    pub nodes: DiffPlan,
    /// Edge classification.
    pub edges: DiffPlan,
}

impl GraphPlan {
    /// Returns true if the graph matches the baseline.
    pub fn is_noop(&self) -> bool {
        self.nodes.is_noop() && self.edges.is_noop()
    }
}

struct ReconcilerInner<N: Entity, E: GraphEdge, R> {
    graph: FlowGraph<N, E>,
    remote: R,
    baseline: Mutex<Baseline<N, E>>,
    echo: EchoGuard,
    flight: SingleFlight,
    debouncer: Debouncer,
    stats: RwLock<ReconcileStats>,
    listeners: Mutex<Option<(ListenerId, ListenerId)>>,
}

impl<N: Entity, E: GraphEdge, R> ReconcilerInner<N, E, R> {
    fn detach(&self, ids: (ListenerId, ListenerId)) {
        self.graph.nodes().unsubscribe(ids.0);
        self.graph.edges().unsubscribe(ids.1);
    }
}

impl<N: Entity, E: GraphEdge, R> Drop for ReconcilerInner<N, E, R> {
    fn drop(&mut self) {
        if let Some(ids) = self.listeners.get_mut().take() {
            self.detach(ids);
        }
    }
}

/// Drives a [`FlowGraph`] toward convergence with the remote.
///
/// Cloning yields another handle to the same reconciler.
pub struct GraphReconciler<N: Entity, E: GraphEdge, R: GraphRemote<N, E>> {
    inner: Arc<ReconcilerInner<N, E, R>>,
}

impl<N: Entity, E: GraphEdge, R: GraphRemote<N, E>> Clone for GraphReconciler<N, E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Entity, E: GraphEdge, R: GraphRemote<N, E>> GraphReconciler<N, E, R> {
    /// Attaches a reconciler to `graph`.
    ///
    /// Entities that already carry an identifier form the initial baseline.
    pub fn new(graph: FlowGraph<N, E>, remote: R, config: ReconcilerConfig) -> Self {
        let baseline = Baseline {
            nodes: saved_by_key(graph.nodes().items()),
            edges: saved_by_key(graph.edges().items()),
        };
        let reconciler = Self {
            inner: Arc::new(ReconcilerInner {
                graph,
                remote,
                baseline: Mutex::new(baseline),
                echo: EchoGuard::new(),
                flight: SingleFlight::default(),
                debouncer: Debouncer::new(config.debounce),
                stats: RwLock::new(ReconcileStats::default()),
                listeners: Mutex::new(None),
            }),
        };

        let graph = &reconciler.inner.graph;
        let node_listener = graph.nodes().subscribe(reconciler.listener());
        let edge_listener = graph.edges().subscribe(reconciler.listener());
        *reconciler.inner.listeners.lock() = Some((node_listener, edge_listener));
        reconciler
    }

    /// The reconciled graph.
    pub fn graph(&self) -> &FlowGraph<N, E> {
        &self.inner.graph
    }

    /// The remote this reconciler writes to.
    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReconcileStats {
        self.inner.stats.read().clone()
    }

    /// Returns true while a pass is in flight.
    pub fn is_flushing(&self) -> bool {
        self.inner.flight.is_busy()
    }

    /// Classifies the graph against the baseline without running anything.
    ///
    /// Returns `None` while a pass is in flight.
    pub fn plan(&self) -> Option<GraphPlan> {
        if self.inner.flight.is_busy() {
            return None;
        }
        let baseline = self.inner.baseline.lock();
        let graph = &self.inner.graph;
        Some(GraphPlan {
            nodes: classify(
                &snapshot_map(baseline.nodes.values()),
                &snapshot_map(&graph.nodes().items()),
            ),
            edges: classify(
                &snapshot_map(baseline.edges.values()),
                &snapshot_map(&graph.edges().items()),
            ),
        })
    }

    /// Runs `mutate` with notifications for `key` suppressed.
    pub fn item_transaction<O>(&self, key: &EntityKey, mutate: impl FnOnce() -> O) -> O {
        self.inner.echo.item_transaction(key, mutate)
    }

    /// Creates one node immediately, outside the debounced pass.
    ///
    /// The issued identifier is attached to the node and the value sent is
    /// recorded as confirmed, so a later edit reconciles as an update. A
    /// node that already has an identifier is returned as is.
    pub async fn create_node_now(&self, key: &EntityKey) -> SyncResult<Identifier> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        let node = self
            .inner
            .graph
            .node(key)
            .ok_or_else(|| CoreError::UnknownKey(key.clone()))?;
        if !node.is_unsaved() {
            return Ok(*node.identifier());
        }

        let id = self.inner.remote.create_node(&node).await.map_err(|err| {
            warn!(%key, error = %err, "direct node create failed");
            self.inner.stats.write().last_error = Some(err.to_string());
            err
        })?;
        let mut sent = node;
        sent.set_identifier(id);
        self.inner.baseline.lock().nodes.insert(key.clone(), sent);
        self.attach_node(key, id);
        debug!(%key, %id, "node created directly");
        Ok(id)
    }

    /// Runs one reconciliation pass.
    ///
    /// If a pass is already in flight this one is re-scheduled and
    /// [`FlushOutcome::Deferred`] is returned. Remote failures are logged
    /// and swallowed; the failed entity is retried by a later pass.
    ///
    /// The baseline is updated as each call completes, so a pass that is
    /// dropped part way leaves it matching what the remote received.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(_flight) = self.inner.flight.try_begin() else {
            self.inner.stats.write().passes_deferred += 1;
            debug!("graph pass already in flight, deferring");
            self.schedule_flush();
            return FlushOutcome::Deferred;
        };

        let previous = self.inner.baseline.lock().clone();
        let nodes = by_key(self.inner.graph.nodes().items());
        let edges = by_key(self.inner.graph.edges().items());
        let node_plan = classify(
            &snapshot_map(previous.nodes.values()),
            &snapshot_map(nodes.values()),
        );
        let edge_plan = classify(
            &snapshot_map(previous.edges.values()),
            &snapshot_map(edges.values()),
        );

        let mut report = FlushReport::default();

        let created = run_phase(pick(&node_plan.creates, &nodes), |node| {
            self.create_node(node)
        })
        .await;
        report.phases.push(tally(Phase::CreateNodes, created));

        let created = run_phase(pick(&edge_plan.creates, &edges), |edge| {
            self.create_edge(edge)
        })
        .await;
        report.phases.push(tally(Phase::CreateEdges, created));

        let updated = run_phase(
            pair(&node_plan.updates, &nodes, &previous.nodes),
            |(node, prev)| self.update_node(node, prev),
        )
        .await;
        report.phases.push(tally(Phase::UpdateNodes, updated));

        let updated = run_phase(
            pair(&edge_plan.updates, &edges, &previous.edges),
            |(edge, prev)| self.update_edge(edge, prev),
        )
        .await;
        report.phases.push(tally(Phase::UpdateEdges, updated));

        let deleted = run_phase(pick(&edge_plan.deletes, &previous.edges), |edge| {
            self.delete_edge(edge)
        })
        .await;
        report.phases.push(tally(Phase::DeleteEdges, deleted));

        let deleted = run_phase(pick(&node_plan.deletes, &previous.nodes), |node| {
            self.delete_node(node)
        })
        .await;
        report.phases.push(tally(Phase::DeleteNodes, deleted));

        self.inner.stats.write().record_pass(&report);
        if report.attempted() > 0 || report.skipped() > 0 {
            info!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                skipped = report.skipped(),
                "graph pass complete"
            );
        }
        FlushOutcome::Completed(report)
    }

    /// Stops scheduling passes and detaches from the graph.
    pub fn close(&self) {
        self.inner.debouncer.close();
        if let Some(ids) = self.inner.listeners.lock().take() {
            self.inner.detach(ids);
        }
    }

    /// Returns true once [`GraphReconciler::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.debouncer.is_closed()
    }

    fn listener(&self) -> optisync_core::Listener {
        let weak: Weak<ReconcilerInner<N, E, R>> = Arc::downgrade(&self.inner);
        Arc::new(move |change: &CollectionChange| {
            if let Some(inner) = weak.upgrade() {
                GraphReconciler { inner }.on_change(change);
            }
        })
    }

    fn on_change(&self, change: &CollectionChange) {
        if self.is_closed() {
            return;
        }
        if self.inner.echo.is_suppressed(&change.key) {
            self.inner.stats.write().notifications_suppressed += 1;
            debug!(key = %change.key, "dropping echo of engine write");
            return;
        }
        self.schedule_flush();
    }

    fn schedule_flush(&self) {
        let reconciler = self.clone();
        self.inner.debouncer.schedule(async move {
            reconciler.flush().await;
        });
    }

    fn failed(&self, key: &EntityKey, phase: Phase, err: &SyncError) {
        warn!(%key, %phase, error = %err, "remote call failed, will retry next pass");
        self.inner.stats.write().last_error = Some(err.to_string());
    }

    fn confirm_node(&self, key: EntityKey, node: Option<N>) {
        let mut baseline = self.inner.baseline.lock();
        match node {
            Some(node) => baseline.nodes.insert(key, node),
            None => baseline.nodes.remove(&key),
        };
    }

    fn confirm_edge(&self, key: EntityKey, edge: Option<E>) {
        let mut baseline = self.inner.baseline.lock();
        match edge {
            Some(edge) => baseline.edges.insert(key, edge),
            None => baseline.edges.remove(&key),
        };
    }

    fn attach_node(&self, key: &EntityKey, id: Identifier) {
        let nodes = self.inner.graph.nodes();
        let attached = self
            .inner
            .echo
            .item_transaction(key, || nodes.update_by_key(key, |node| node.set_identifier(id)));
        if attached.is_err() {
            debug!(%key, %id, "node vanished before create returned");
        }
    }

    /// Identifiers of both endpoints, which must already exist remotely.
    fn resolve_endpoints(&self, edge: &E) -> SyncResult<(Identifier, Identifier)> {
        let resolve = |node: &EntityKey| {
            self.inner
                .graph
                .node(node)
                .map(|found| *found.identifier())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| SyncError::UnresolvedEndpoint {
                    edge: edge.key(),
                    node: node.clone(),
                })
        };
        Ok((resolve(edge.source())?, resolve(edge.target())?))
    }

    async fn create_node(&self, node: &N) -> CallOutcome {
        let key = node.key();
        if !node.is_unsaved() {
            // Saved outside this reconciler; taken as remote state, like a loaded node.
            debug!(%key, "node already created, adopting");
            self.confirm_node(key, Some(node.clone()));
            return CallOutcome::Skipped;
        }
        match self.inner.remote.create_node(node).await {
            Ok(id) => {
                let mut sent = node.clone();
                sent.set_identifier(id);
                self.confirm_node(key.clone(), Some(sent));
                self.attach_node(&key, id);
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::CreateNodes, &err);
                CallOutcome::Failed
            }
        }
    }

    async fn create_edge(&self, edge: &E) -> CallOutcome {
        let key = edge.key();
        if !edge.is_unsaved() {
            debug!(%key, "edge already created, adopting");
            self.confirm_edge(key, Some(edge.clone()));
            return CallOutcome::Skipped;
        }
        let (source_id, target_id) = match self.resolve_endpoints(edge) {
            Ok(ids) => ids,
            Err(err) => {
                debug!(%key, error = %err, "edge endpoints unresolved, retrying next pass");
                return CallOutcome::Skipped;
            }
        };
        let mut bound = edge.clone();
        bound.bind_endpoints(source_id, target_id);

        match self.inner.remote.create_edge(&bound).await {
            Ok(id) => {
                bound.set_identifier(id);
                self.confirm_edge(key.clone(), Some(bound));
                let edges = self.inner.graph.edges();
                let attached = self.inner.echo.item_transaction(&key, || {
                    edges.update_by_key(&key, |local| {
                        local.set_identifier(id);
                        // Endpoints may have moved while the call was out.
                        if local.source() == edge.source() && local.target() == edge.target() {
                            local.bind_endpoints(source_id, target_id);
                        }
                    })
                });
                if attached.is_err() {
                    debug!(%key, %id, "edge vanished before create returned");
                }
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::CreateEdges, &err);
                CallOutcome::Failed
            }
        }
    }

    async fn update_node(&self, node: &N, prev: &N) -> CallOutcome {
        let key = node.key();
        let mut node = node.clone();
        if node.is_unsaved() {
            node.set_identifier(*prev.identifier());
        }
        match self.inner.remote.update_node(&node).await {
            Ok(()) => {
                self.confirm_node(key, Some(node));
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::UpdateNodes, &err);
                CallOutcome::Failed
            }
        }
    }

    async fn update_edge(&self, edge: &E, prev: &E) -> CallOutcome {
        let key = edge.key();
        let (source_id, target_id) = match self.resolve_endpoints(edge) {
            Ok(ids) => ids,
            Err(err) => {
                debug!(%key, error = %err, "edge endpoints unresolved, retrying next pass");
                return CallOutcome::Skipped;
            }
        };
        let mut bound = edge.clone();
        bound.bind_endpoints(source_id, target_id);
        if bound.is_unsaved() {
            bound.set_identifier(*prev.identifier());
        }
        match self.inner.remote.update_edge(&bound).await {
            Ok(()) => {
                self.confirm_edge(key, Some(bound));
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::UpdateEdges, &err);
                CallOutcome::Failed
            }
        }
    }

    async fn delete_edge(&self, edge: &E) -> CallOutcome {
        let key = edge.key();
        match self.inner.remote.delete_edge(edge).await {
            Ok(()) => {
                self.confirm_edge(key, None);
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::DeleteEdges, &err);
                CallOutcome::Failed
            }
        }
    }

    async fn delete_node(&self, node: &N) -> CallOutcome {
        let key = node.key();
        match self.inner.remote.delete_node(node).await {
            Ok(()) => {
                self.confirm_node(key, None);
                CallOutcome::Succeeded
            }
            Err(err) => {
                self.failed(&key, Phase::DeleteNodes, &err);
                CallOutcome::Failed
            }
        }
    }
}

fn by_key<T: Entity>(items: Vec<T>) -> BTreeMap<EntityKey, T> {
    items.into_iter().map(|item| (item.key(), item)).collect()
}

fn saved_by_key<T: Entity>(items: Vec<T>) -> BTreeMap<EntityKey, T> {
    by_key(items.into_iter().filter(|item| !item.is_unsaved()).collect())
}

fn pick<'a, T>(keys: &'a [EntityKey], from: &'a BTreeMap<EntityKey, T>) -> Vec<&'a T> {
    keys.iter().filter_map(|key| from.get(key)).collect()
}

fn pair<'a, T>(
    keys: &'a [EntityKey],
    current: &'a BTreeMap<EntityKey, T>,
    previous: &'a BTreeMap<EntityKey, T>,
) -> Vec<(&'a T, &'a T)> {
    keys.iter()
        .filter_map(|key| Some((current.get(key)?, previous.get(key)?)))
        .collect()
}

async fn run_phase<I, F, Fut>(items: Vec<I>, op: F) -> Vec<CallOutcome>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = CallOutcome>,
{
    join_all(items.into_iter().map(op)).await
}

fn tally(phase: Phase, outcomes: Vec<CallOutcome>) -> PhaseReport {
    let mut report = PhaseReport::new(phase);
    for outcome in outcomes {
        report.record(outcome);
    }
    report
}
