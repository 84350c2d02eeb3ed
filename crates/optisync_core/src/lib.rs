//! # OptiSync Core
//!
//! Identity, snapshot and diff primitives for OptiSync.
//!
//! This crate provides:
//! - `Identifier`, the sortable entity identifier with a distinguished empty value
//! - The `Entity` trait and normalized comparable values
//! - Snapshot maps and the create/update/delete/ignore diff classifier
//! - `ObservableCollection`, the subscribable ordered list edited by the UI
//!
//! Nothing in this crate performs I/O. The reconciliation engine that drives
//! a collection toward a remote store lives in `optisync_engine`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod diff;
mod entity;
mod error;
mod identity;
mod snapshot;

pub use collection::{ChangeKind, CollectionChange, Listener, ListenerId, ObservableCollection};
pub use diff::{classify, classify_key, Classification, DiffPlan};
pub use entity::{normalize_serialized, ComparableValue, Entity, EntityKey};
pub use error::{CoreError, CoreResult};
pub use identity::Identifier;
pub use snapshot::{snapshot_map, SnapshotMap};
