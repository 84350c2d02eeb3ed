//! # OptiSync Testkit
//!
//! Test utilities for OptiSync.
//!
//! This crate provides:
//! - Entity fixtures (header rows, delta rows, flow nodes and edges)
//! - In-memory remote helpers sharing one call log
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use optisync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn creates_header() {
//!     let queue = TaskQueue::new(header_table(vec![]), MemoryRemote::new("headers"), QueueConfig::manual());
//!     queue.edit_row(0, HeaderRow::new("Accept", "*/*")).unwrap();
//!     queue.flush().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
