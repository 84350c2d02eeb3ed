//! # OptiSync Engine
//!
//! Optimistic local-to-remote reconciliation for editable collections.
//!
//! This crate provides:
//! - `TaskQueue`, per-row reconciliation for tabular editors
//! - `GraphReconciler`, phased reconciliation for node/edge canvases
//! - Echo suppression for writes the engine makes to its own collections
//! - Debounced, single-flight pass scheduling
//! - `MemoryRemote`, an in-memory remote store with a call log
//!
//! ## Architecture
//!
//! The UI is authoritative. Edits land in an `ObservableCollection`
//! immediately; the engine observes the collection and issues remote
//! create/update/delete calls after a quiescence window:
//! 1. A change notification records a task (or marks the graph dirty)
//! 2. A debounced pass runs the pending work concurrently
//! 3. Identifiers issued by the remote are written back under echo
//!    suppression
//!
//! ## Key Invariants
//!
//! - One pending task per row; later edits overwrite earlier ones
//! - An entity without an identifier is created, never updated
//! - At most one pass runs per queue or reconciler
//! - Graph nodes are created before edges and deleted after them
//! - Remote failures are logged and swallowed, never surfaced to the editor

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod echo;
mod error;
mod graph;
mod memory;
mod queue;
mod reconciler;
mod remote;
mod schedule;
mod stats;
mod task;

pub use config::{QueueConfig, ReconcilerConfig, DEFAULT_GRAPH_DEBOUNCE, DEFAULT_QUEUE_DEBOUNCE};
pub use echo::EchoGuard;
pub use error::{SyncError, SyncResult};
pub use graph::{FlowGraph, GraphEdge};
pub use memory::{CallLog, MemoryRemote, RemoteCall, RemoteOp};
pub use queue::TaskQueue;
pub use reconciler::{GraphPlan, GraphReconciler};
pub use remote::{EntityRemote, GraphRemote};
pub use stats::{FlushOutcome, FlushReport, Phase, PhaseReport, ReconcileStats};
pub use task::{Row, Task, TaskType};
