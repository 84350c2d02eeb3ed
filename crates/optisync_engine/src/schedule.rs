//! Debounced pass scheduling and single-flight passes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

/// Coalesces bursts of schedule requests into one delayed pass.
///
/// Every call to [`Debouncer::schedule`] restarts the quiescence window;
/// only the most recent request fires.
#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Option<Duration>,
    generation: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Debouncer {
    pub(crate) fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            generation: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs `pass` once the window elapses without another request.
    ///
    /// No-op when scheduling is manual, the debouncer is closed, or there
    /// is no tokio runtime on this thread.
    pub(crate) fn schedule<F>(&self, pass: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(window) = self.window else {
            return;
        };
        if self.is_closed() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(runtime) = Handle::try_current() else {
            debug!("no tokio runtime, pass must be flushed manually");
            return;
        };

        let latest = Arc::clone(&self.generation);
        let closed = Arc::clone(&self.closed);
        runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if latest.load(Ordering::SeqCst) != generation {
                return;
            }
            if closed.load(Ordering::SeqCst) {
                return;
            }
            pass.await;
        });
    }

    /// Stops all future passes. Already running passes finish.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// At-most-one-pass-at-a-time flag.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    /// Claims the flag, or returns `None` if a pass is already in flight.
    pub(crate) fn try_begin(&self) -> Option<Flight<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Flight { busy: &self.busy })
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Releases the [`SingleFlight`] flag on drop, including on unwind.
pub(crate) struct Flight<'a> {
    busy: &'a AtomicBool,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}
