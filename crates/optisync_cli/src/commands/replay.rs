//! Replay command implementation.
//!
//! Runs a JSON edit script against a header table, a parameter override
//! table and a flow canvas, all backed by in-memory remotes that share one
//! call log. Passes are never automatic here: the script decides when rows
//! and the graph are flushed.

use std::path::Path;

use optisync_core::{EntityKey, Identifier};
use optisync_engine::{
    CallLog, GraphReconciler, MemoryRemote, QueueConfig, ReconcileStats, ReconcilerConfig,
    RemoteCall, SyncError, SyncResult, TaskQueue,
};
use optisync_testkit::{DeltaRow, FlowEdge, FlowNode, FlowRemote, HeaderRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while replaying a script.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The script could not be read, or the runtime could not start.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script is not valid JSON or has an unknown step.
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    /// A step was rejected by the engine.
    #[error("step {step}: {source}")]
    Step {
        /// One-based step number.
        step: usize,
        /// Engine error.
        #[source]
        source: SyncError,
    },
}

/// An edit script.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Headers already stored remotely when the script starts.
    #[serde(default)]
    pub headers: Vec<Seed>,
    /// Inherited parameters, without overrides.
    #[serde(default)]
    pub params: Vec<Seed>,
    /// Steps, applied in order.
    pub steps: Vec<Step>,
}

/// Initial `name`/`value` pair of a table row.
#[derive(Debug, Deserialize)]
pub struct Seed {
    /// Row name.
    pub name: String,
    /// Row value.
    pub value: String,
}

/// Table addressed by a row step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// The header table.
    #[default]
    Headers,
    /// The parameter override table.
    Params,
}

/// Remote addressed by a `fail_next` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Header remote.
    Headers,
    /// Parameter override remote.
    Params,
    /// Node remote.
    Nodes,
    /// Edge remote.
    Edges,
}

/// One scripted user action.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Patch the name and/or value of a row.
    EditRow {
        /// Target table.
        #[serde(default)]
        table: Table,
        /// Row index.
        index: usize,
        /// New name.
        #[serde(default)]
        name: Option<String>,
        /// New value.
        #[serde(default)]
        value: Option<String>,
    },
    /// Request deletion of a row.
    DeleteRow {
        /// Target table.
        #[serde(default)]
        table: Table,
        /// Row index.
        index: usize,
    },
    /// Revert a parameter to its inherited value.
    UndoRow {
        /// Row index in the parameter table.
        index: usize,
    },
    /// Draw a node.
    AddNode {
        /// Canvas key.
        key: String,
        /// Label.
        label: String,
        /// Node kind.
        #[serde(default)]
        kind: Option<String>,
    },
    /// Relabel a node.
    UpdateNode {
        /// Canvas key.
        key: String,
        /// New label.
        label: String,
    },
    /// Remove a node and its edges.
    RemoveNode {
        /// Canvas key.
        key: String,
    },
    /// Draw an edge.
    Connect {
        /// Canvas key of the edge.
        key: String,
        /// Source node key.
        source: String,
        /// Target node key.
        target: String,
    },
    /// Remove an edge.
    Disconnect {
        /// Canvas key of the edge.
        key: String,
    },
    /// Run a pass on both tables.
    FlushRows,
    /// Run a graph pass.
    FlushGraph,
    /// Make the next calls on one remote fail.
    FailNext {
        /// Remote to break.
        target: Target,
        /// Number of failing calls.
        #[serde(default = "one")]
        count: usize,
    },
}

fn one() -> usize {
    1
}

/// Final state after a replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Every remote call, in completion order.
    pub calls: Vec<RemoteCall>,
    /// Header table.
    pub headers: Vec<HeaderRow>,
    /// Parameter table.
    pub params: Vec<DeltaRow>,
    /// Canvas nodes.
    pub nodes: Vec<FlowNode>,
    /// Canvas edges.
    pub edges: Vec<FlowEdge>,
    /// Per-component statistics.
    pub stats: Vec<StatsSummary>,
}

/// Serializable view of [`ReconcileStats`].
#[derive(Debug, Serialize)]
pub struct StatsSummary {
    /// Component name.
    pub component: &'static str,
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Passes deferred because another was in flight.
    pub passes_deferred: u64,
    /// Remote calls that succeeded.
    pub calls_succeeded: u64,
    /// Remote calls that failed.
    pub calls_failed: u64,
    /// Change notifications dropped as echoes.
    pub notifications_suppressed: u64,
    /// Last remote failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StatsSummary {
    fn new(component: &'static str, stats: ReconcileStats) -> Self {
        Self {
            component,
            passes_completed: stats.passes_completed,
            passes_deferred: stats.passes_deferred,
            calls_succeeded: stats.calls_succeeded,
            calls_failed: stats.calls_failed,
            notifications_suppressed: stats.notifications_suppressed,
            last_error: stats.last_error,
        }
    }
}

/// Runs the replay command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Loads and replays the script at `path`.
pub fn execute(path: &Path) -> Result<ReplayReport, ReplayError> {
    let script = load_script(path)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(replay(script))
}

/// Reads a script from disk.
pub fn load_script(path: &Path) -> Result<Script, ReplayError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Replays `script` against fresh in-memory remotes.
pub async fn replay(script: Script) -> Result<ReplayReport, ReplayError> {
    let session = Session::new(&script);
    for (i, step) in script.steps.iter().enumerate() {
        debug!(step = i + 1, ?step, "applying");
        session
            .apply(step)
            .await
            .map_err(|source| ReplayError::Step { step: i + 1, source })?;
    }
    info!(steps = script.steps.len(), calls = session.log.len(), "replay complete");
    Ok(session.report())
}

type HeaderQueue = TaskQueue<HeaderRow, MemoryRemote<HeaderRow>>;
type ParamQueue = TaskQueue<DeltaRow, MemoryRemote<DeltaRow>>;
type FlowReconciler = GraphReconciler<FlowNode, FlowEdge, FlowRemote>;

struct Session {
    log: CallLog,
    headers: HeaderQueue,
    params: ParamQueue,
    graph: FlowReconciler,
}

impl Session {
    fn new(script: &Script) -> Self {
        let log = CallLog::new();

        let headers: Vec<HeaderRow> = script
            .headers
            .iter()
            .map(|seed| {
                let mut row = HeaderRow::new(seed.name.as_str(), seed.value.as_str());
                row.id = Identifier::generate();
                row
            })
            .collect();
        let header_remote = MemoryRemote::with_log("headers", log.clone());
        header_remote.seed(headers.clone());

        let params = script
            .params
            .iter()
            .map(|seed| DeltaRow::inherited(Identifier::generate(), seed.name.as_str(), seed.value.as_str()))
            .collect();

        let flow_remote = (
            MemoryRemote::with_log("nodes", log.clone()),
            MemoryRemote::with_log("edges", log.clone()),
        );

        Self {
            headers: TaskQueue::new(
                optisync_testkit::header_table(headers),
                header_remote,
                QueueConfig::manual(),
            ),
            params: TaskQueue::new(
                optisync_core::ObservableCollection::new(params),
                MemoryRemote::with_log("params", log.clone()),
                QueueConfig::manual().without_trailing_blank(),
            ),
            graph: GraphReconciler::new(
                optisync_testkit::flow_graph(),
                flow_remote,
                ReconcilerConfig::manual(),
            ),
            log,
        }
    }

    async fn apply(&self, step: &Step) -> SyncResult<()> {
        let graph = self.graph.graph();
        match step {
            Step::EditRow {
                table,
                index,
                name,
                value,
            } => match table {
                Table::Headers => self.headers.rows().update(*index, |row| {
                    patch(&mut row.name, name);
                    patch(&mut row.value, value);
                })?,
                Table::Params => self.params.rows().update(*index, |row| {
                    patch(&mut row.name, name);
                    patch(&mut row.value, value);
                })?,
            },
            Step::DeleteRow { table, index } => match table {
                Table::Headers => self.headers.delete_row(*index)?,
                Table::Params => self.params.delete_row(*index)?,
            },
            Step::UndoRow { index } => self.params.undo_row(*index)?,
            Step::AddNode { key, label, kind } => {
                let mut node = FlowNode::new(key.as_str(), label.as_str());
                if let Some(kind) = kind {
                    node.kind = kind.clone();
                }
                graph.make_node(node);
            }
            Step::UpdateNode { key, label } => {
                graph.update_node(&EntityKey::from(key.as_str()), |node| node.label = label.clone())?
            }
            Step::RemoveNode { key } => {
                graph.remove_node(&EntityKey::from(key.as_str()))?;
            }
            Step::Connect {
                key,
                source,
                target,
            } => {
                graph.make_edge(FlowEdge::new(key.as_str(), source.as_str(), target.as_str()));
            }
            Step::Disconnect { key } => {
                graph.remove_edge(&EntityKey::from(key.as_str()))?;
            }
            Step::FlushRows => {
                self.headers.flush().await;
                self.params.flush().await;
            }
            Step::FlushGraph => {
                self.graph.flush().await;
            }
            Step::FailNext { target, count } => match target {
                Target::Headers => self.headers.remote().fail_next(*count),
                Target::Params => self.params.remote().fail_next(*count),
                Target::Nodes => self.graph.remote().0.fail_next(*count),
                Target::Edges => self.graph.remote().1.fail_next(*count),
            },
        }
        Ok(())
    }

    fn report(&self) -> ReplayReport {
        let graph = self.graph.graph();
        ReplayReport {
            calls: self.log.calls(),
            headers: self.headers.rows().items(),
            params: self.params.rows().items(),
            nodes: graph.nodes().items(),
            edges: graph.edges().items(),
            stats: vec![
                StatsSummary::new("headers", self.headers.stats()),
                StatsSummary::new("params", self.params.stats()),
                StatsSummary::new("graph", self.graph.stats()),
            ],
        }
    }
}

fn patch(field: &mut String, update: &Option<String>) {
    if let Some(update) = update {
        field.clone_from(update);
    }
}

fn print_text_output(report: &ReplayReport) {
    println!("Remote calls ({}):", report.calls.len());
    for (i, call) in report.calls.iter().enumerate() {
        println!(
            "  {:>3}. {:<8} {:<7} key={} id={} {}",
            i + 1,
            call.collection,
            call.op,
            display_key(&call.key),
            call.identifier,
            if call.ok { "ok" } else { "FAILED" }
        );
    }

    println!();
    println!("Headers:");
    for row in &report.headers {
        println!("  [{}] {} = {}", display_id(&row.id), row.name, row.value);
    }
    if !report.params.is_empty() {
        println!("Params:");
        for row in &report.params {
            println!(
                "  [{}] {} = {} (inherits {})",
                display_id(&row.id),
                row.name,
                row.value,
                row.parent_value
            );
        }
    }
    if !report.nodes.is_empty() {
        println!("Nodes:");
        for node in &report.nodes {
            println!("  {} [{}] {}", node.canvas_key, display_id(&node.id), node.label);
        }
    }
    if !report.edges.is_empty() {
        println!("Edges:");
        for edge in &report.edges {
            println!(
                "  {} [{}] {} -> {}",
                edge.canvas_key,
                display_id(&edge.id),
                edge.source,
                edge.target
            );
        }
    }

    println!();
    println!("Stats:");
    for stats in &report.stats {
        println!(
            "  {:<8} passes={} deferred={} ok={} failed={} suppressed={}",
            stats.component,
            stats.passes_completed,
            stats.passes_deferred,
            stats.calls_succeeded,
            stats.calls_failed,
            stats.notifications_suppressed
        );
        if let Some(error) = &stats.last_error {
            println!("           last error: {error}");
        }
    }
}

fn display_id(id: &Identifier) -> String {
    if id.is_empty() {
        "unsaved".to_string()
    } else {
        id.to_string()
    }
}

fn display_key(key: &EntityKey) -> &str {
    if key.is_unsaved() {
        "<blank>"
    } else {
        key.as_str()
    }
}
