//! Pass reports and per-instance statistics.

use std::fmt;
use std::time::Instant;

/// A batch of same-kind operations within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Per-row tasks of a flat table (creates, updates, deletes, undos).
    Rows,
    /// Graph node creates.
    CreateNodes,
    /// Graph edge creates.
    CreateEdges,
    /// Graph node updates.
    UpdateNodes,
    /// Graph edge updates.
    UpdateEdges,
    /// Graph edge deletes.
    DeleteEdges,
    /// Graph node deletes.
    DeleteNodes,
}

impl Phase {
    /// Graph phases in execution order.
    pub const GRAPH_ORDER: [Phase; 6] = [
        Phase::CreateNodes,
        Phase::CreateEdges,
        Phase::UpdateNodes,
        Phase::UpdateEdges,
        Phase::DeleteEdges,
        Phase::DeleteNodes,
    ];

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Rows => "rows",
            Phase::CreateNodes => "create_nodes",
            Phase::CreateEdges => "create_edges",
            Phase::UpdateNodes => "update_nodes",
            Phase::UpdateEdges => "update_edges",
            Phase::DeleteEdges => "delete_edges",
            Phase::DeleteNodes => "delete_nodes",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome counts for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseReport {
    /// The phase.
    pub phase: Phase,
    /// Remote calls issued.
    pub attempted: usize,
    /// Remote calls that succeeded.
    pub succeeded: usize,
    /// Remote calls that failed.
    pub failed: usize,
    /// Entries settled without a remote call (local-only, already
    /// assigned, orphaned or unresolved).
    pub skipped: usize,
}

impl PhaseReport {
    /// Creates an empty report.
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub(crate) fn record(&mut self, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Succeeded => {
                self.attempted += 1;
                self.succeeded += 1;
            }
            CallOutcome::Failed => {
                self.attempted += 1;
                self.failed += 1;
            }
            CallOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of a single unit of work inside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Report of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Per-phase counts in execution order.
    pub phases: Vec<PhaseReport>,
}

impl FlushReport {
    /// Returns the report of `phase`, if it ran.
    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Total remote calls issued.
    pub fn attempted(&self) -> usize {
        self.phases.iter().map(|p| p.attempted).sum()
    }

    /// Total remote calls that succeeded.
    pub fn succeeded(&self) -> usize {
        self.phases.iter().map(|p| p.succeeded).sum()
    }

    /// Total remote calls that failed.
    pub fn failed(&self) -> usize {
        self.phases.iter().map(|p| p.failed).sum()
    }

    /// Total entries settled without a remote call.
    pub fn skipped(&self) -> usize {
        self.phases.iter().map(|p| p.skipped).sum()
    }
}

/// What a call to `flush` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another pass was in flight; this one was re-scheduled.
    Deferred,
    /// The pass ran to completion.
    Completed(FlushReport),
}

impl FlushOutcome {
    /// Returns the report if the pass completed.
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            FlushOutcome::Completed(report) => Some(report),
            FlushOutcome::Deferred => None,
        }
    }

    /// Returns true if the pass was deferred.
    pub fn is_deferred(&self) -> bool {
        matches!(self, FlushOutcome::Deferred)
    }
}

/// Statistics about reconciliation on one collection.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Passes deferred because another was in flight.
    pub passes_deferred: u64,
    /// Remote calls that succeeded.
    pub calls_succeeded: u64,
    /// Remote calls that failed.
    pub calls_failed: u64,
    /// Change notifications dropped by echo suppression.
    pub notifications_suppressed: u64,
    /// Last remote failure message.
    pub last_error: Option<String>,
    /// Completion time of the last pass.
    pub last_pass_time: Option<Instant>,
}

impl ReconcileStats {
    pub(crate) fn record_pass(&mut self, report: &FlushReport) {
        self.passes_completed += 1;
        self.calls_succeeded += report.succeeded() as u64;
        self.calls_failed += report.failed() as u64;
        self.last_pass_time = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_report_counts() {
        let mut report = PhaseReport::new(Phase::Rows);
        report.record(CallOutcome::Succeeded);
        report.record(CallOutcome::Failed);
        report.record(CallOutcome::Skipped);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn flush_report_totals() {
        let mut creates = PhaseReport::new(Phase::CreateNodes);
        creates.record(CallOutcome::Succeeded);
        creates.record(CallOutcome::Succeeded);
        let mut deletes = PhaseReport::new(Phase::DeleteNodes);
        deletes.record(CallOutcome::Failed);

        let report = FlushReport {
            phases: vec![creates, deletes],
        };
        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.phase(Phase::DeleteNodes).unwrap().failed, 1);
        assert!(report.phase(Phase::Rows).is_none());

        let mut stats = ReconcileStats::default();
        stats.record_pass(&report);
        assert_eq!(stats.passes_completed, 1);
        assert_eq!(stats.calls_succeeded, 2);
        assert_eq!(stats.calls_failed, 1);
        assert!(stats.last_pass_time.is_some());
    }

    #[test]
    fn graph_order_is_dependency_safe() {
        let position = |p: Phase| Phase::GRAPH_ORDER.iter().position(|q| *q == p).unwrap();
        assert!(position(Phase::CreateNodes) < position(Phase::CreateEdges));
        assert!(position(Phase::CreateEdges) < position(Phase::UpdateNodes));
        assert!(position(Phase::DeleteEdges) < position(Phase::DeleteNodes));
    }
}
