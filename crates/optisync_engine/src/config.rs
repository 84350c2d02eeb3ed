//! Configuration for the task queue and the graph reconciler.

use std::time::Duration;

/// Default quiescence window for tabular editors.
pub const DEFAULT_QUEUE_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default quiescence window for the flow graph editor.
pub const DEFAULT_GRAPH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Configuration for a [`TaskQueue`](crate::TaskQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Debounce window. `None` disables automatic flushing; callers drive
    /// [`TaskQueue::flush`](crate::TaskQueue::flush) themselves.
    pub debounce: Option<Duration>,
    /// Whether the table keeps a synthetic blank row at the end.
    pub trailing_blank: bool,
}

impl QueueConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            debounce: Some(DEFAULT_QUEUE_DEBOUNCE),
            trailing_blank: true,
        }
    }

    /// Creates a configuration without automatic flushing.
    pub fn manual() -> Self {
        Self {
            debounce: None,
            ..Self::new()
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    /// Disables the synthetic trailing blank row (delta tables).
    pub fn without_trailing_blank(mut self) -> Self {
        self.trailing_blank = false;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a [`GraphReconciler`](crate::GraphReconciler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Debounce window. `None` disables automatic passes.
    pub debounce: Option<Duration>,
}

impl ReconcilerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            debounce: Some(DEFAULT_GRAPH_DEBOUNCE),
        }
    }

    /// Creates a configuration without automatic passes.
    pub fn manual() -> Self {
        Self { debounce: None }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::new()
    }
}
