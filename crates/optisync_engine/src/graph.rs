//! Flow graph model: observable node and edge collections.

use optisync_core::{CoreError, CoreResult, Entity, EntityKey, Identifier, ObservableCollection};

/// An edge between two nodes of a [`FlowGraph`].
///
/// Edges reference their endpoints by node key, which is known before the
/// nodes are created remotely. The remote wants node identifiers, so the
/// reconciler binds them right before the edge is sent.
pub trait GraphEdge: Entity {
    /// Key of the source node.
    fn source(&self) -> &EntityKey;

    /// Key of the target node.
    fn target(&self) -> &EntityKey;

    /// Records the resolved remote identifiers of both endpoints.
    fn bind_endpoints(&mut self, source: Identifier, target: Identifier);

    /// Returns true if `node` is either endpoint.
    fn touches(&self, node: &EntityKey) -> bool {
        self.source() == node || self.target() == node
    }
}

/// Nodes and edges edited on a canvas.
///
/// Cloning yields another handle to the same collections.
pub struct FlowGraph<N, E> {
    nodes: ObservableCollection<N>,
    edges: ObservableCollection<E>,
}

impl<N, E> Clone for FlowGraph<N, E> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }
}

impl<N: Entity, E: GraphEdge> FlowGraph<N, E> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    /// Creates a graph from entities loaded from the server.
    pub fn from_parts(nodes: Vec<N>, edges: Vec<E>) -> Self {
        Self {
            nodes: ObservableCollection::new(nodes),
            edges: ObservableCollection::new(edges),
        }
    }

    /// The node collection.
    pub fn nodes(&self) -> &ObservableCollection<N> {
        &self.nodes
    }

    /// The edge collection.
    pub fn edges(&self) -> &ObservableCollection<E> {
        &self.edges
    }

    /// Returns the node with `key`.
    pub fn node(&self, key: &EntityKey) -> Option<N> {
        self.nodes.find(key).map(|(_, node)| node)
    }

    /// Returns the edge with `key`.
    pub fn edge(&self, key: &EntityKey) -> Option<E> {
        self.edges.find(key).map(|(_, edge)| edge)
    }

    /// Adds a node and returns its key.
    pub fn make_node(&self, node: N) -> EntityKey {
        let key = node.key();
        self.nodes.push(node);
        key
    }

    /// Adds an edge and returns its key.
    ///
    /// Endpoints are not checked here; an edge whose endpoints never resolve
    /// is simply never created remotely.
    pub fn make_edge(&self, edge: E) -> EntityKey {
        let key = edge.key();
        self.edges.push(edge);
        key
    }

    /// Patches the node with `key`.
    pub fn update_node(&self, key: &EntityKey, patch: impl FnOnce(&mut N)) -> CoreResult<()> {
        self.nodes.update_by_key(key, patch).map(|_| ())
    }

    /// Patches the edge with `key`.
    pub fn update_edge(&self, key: &EntityKey, patch: impl FnOnce(&mut E)) -> CoreResult<()> {
        self.edges.update_by_key(key, patch).map(|_| ())
    }

    /// Removes the node with `key` together with every edge attached to it.
    pub fn remove_node(&self, key: &EntityKey) -> CoreResult<(N, Vec<E>)> {
        let index = self
            .nodes
            .position(key)
            .ok_or_else(|| CoreError::UnknownKey(key.clone()))?;
        let detached = self.edges.retain(|edge| !edge.touches(key));
        let node = self.nodes.remove(index)?;
        Ok((node, detached))
    }

    /// Removes the edge with `key`.
    pub fn remove_edge(&self, key: &EntityKey) -> CoreResult<E> {
        let index = self
            .edges
            .position(key)
            .ok_or_else(|| CoreError::UnknownKey(key.clone()))?;
        self.edges.remove(index)
    }
}

impl<N: Entity, E: GraphEdge> Default for FlowGraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}
