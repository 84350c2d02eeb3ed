//! Remote store abstraction.

use async_trait::async_trait;
use optisync_core::{Entity, Identifier};

use crate::error::SyncResult;

/// Remote create/update/delete operations for one entity type.
///
/// This trait abstracts the RPC layer, allowing for different
/// implementations (HTTP API client, in-memory store for tests, etc.).
/// Implementations report failures as [`SyncError::Remote`](crate::SyncError::Remote);
/// the engine logs and swallows them.
#[async_trait]
pub trait EntityRemote<T: Entity>: Send + Sync + 'static {
    /// Creates `entity` and returns the identifier issued by the remote.
    async fn create(&self, entity: &T) -> SyncResult<Identifier>;

    /// Updates an existing entity. `entity` carries its identifier.
    async fn update(&self, entity: &T) -> SyncResult<()>;

    /// Deletes an existing entity. `entity` carries its identifier.
    async fn delete(&self, entity: &T) -> SyncResult<()>;
}

/// Remote operations for a graph of nodes `N` and edges `E`.
///
/// Any pair of [`EntityRemote`]s `(nodes, edges)` is a `GraphRemote`.
#[async_trait]
pub trait GraphRemote<N: Entity, E: Entity>: Send + Sync + 'static {
    /// Creates a node.
    async fn create_node(&self, node: &N) -> SyncResult<Identifier>;
    /// Updates a node.
    async fn update_node(&self, node: &N) -> SyncResult<()>;
    /// Deletes a node.
    async fn delete_node(&self, node: &N) -> SyncResult<()>;
    /// Creates an edge whose endpoint identifiers are bound.
    async fn create_edge(&self, edge: &E) -> SyncResult<Identifier>;
    /// Updates an edge.
    async fn update_edge(&self, edge: &E) -> SyncResult<()>;
    /// Deletes an edge.
    async fn delete_edge(&self, edge: &E) -> SyncResult<()>;
}

#[async_trait]
impl<N, E, NR, ER> GraphRemote<N, E> for (NR, ER)
where
    N: Entity,
    E: Entity,
    NR: EntityRemote<N>,
    ER: EntityRemote<E>,
{
    async fn create_node(&self, node: &N) -> SyncResult<Identifier> {
        self.0.create(node).await
    }

    async fn update_node(&self, node: &N) -> SyncResult<()> {
        self.0.update(node).await
    }

    async fn delete_node(&self, node: &N) -> SyncResult<()> {
        self.0.delete(node).await
    }

    async fn create_edge(&self, edge: &E) -> SyncResult<Identifier> {
        self.1.create(edge).await
    }

    async fn update_edge(&self, edge: &E) -> SyncResult<()> {
        self.1.update(edge).await
    }

    async fn delete_edge(&self, edge: &E) -> SyncResult<()> {
        self.1.delete(edge).await
    }
}
