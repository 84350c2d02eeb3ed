//! Entity fixtures and remote helpers.
//!
//! The fixtures mirror the collections a request editor reconciles: a
//! header table with a trailing blank row, a parameter override table keyed
//! by the parent parameter, and a flow canvas of nodes and edges.

use optisync_core::{Entity, EntityKey, Identifier, ObservableCollection};
use optisync_engine::{CallLog, FlowGraph, GraphEdge, MemoryRemote, Row};
use serde::{Deserialize, Serialize};

/// A request header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRow {
    /// Remote identifier; empty until created.
    #[serde(default)]
    pub id: Identifier,
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
    /// Whether the header is sent.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl HeaderRow {
    /// Creates an unsaved header.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Identifier::empty(),
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

impl Entity for HeaderRow {
    fn identifier(&self) -> &Identifier {
        &self.id
    }

    fn set_identifier(&mut self, id: Identifier) {
        self.id = id;
    }
}

impl Row for HeaderRow {
    fn blank() -> Self {
        Self::new("", "")
    }
}

/// A parameter row that overrides a value inherited from a parent.
///
/// The row exists locally whether or not an override is stored; `id` is the
/// identifier of the override, so an unsaved row simply shows the parent
/// value. Rows are tracked by the parent's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRow {
    /// Identifier of the override; empty while inheriting.
    #[serde(default)]
    pub id: Identifier,
    /// Identifier of the inherited parameter.
    pub parent_id: Identifier,
    /// Parameter name.
    pub name: String,
    /// Effective value.
    pub value: String,
    /// Inherited value.
    pub parent_value: String,
}

impl DeltaRow {
    /// A row showing the parent value without an override.
    pub fn inherited(
        parent_id: Identifier,
        name: impl Into<String>,
        parent_value: impl Into<String>,
    ) -> Self {
        let parent_value = parent_value.into();
        Self {
            id: Identifier::empty(),
            parent_id,
            name: name.into(),
            value: parent_value.clone(),
            parent_value,
        }
    }

    /// Returns true if the row shows a value different from its parent.
    pub fn is_overridden(&self) -> bool {
        self.value != self.parent_value
    }
}

impl Entity for DeltaRow {
    const TRANSIENT_FIELDS: &'static [&'static str] = &["parent_value"];

    fn identifier(&self) -> &Identifier {
        &self.id
    }

    fn set_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn key(&self) -> EntityKey {
        EntityKey::from(&self.parent_id)
    }
}

impl Row for DeltaRow {
    /// A row with no parent, keyed by the empty key.
    ///
    /// Delta rows only exist for inherited parameters, so there is nothing
    /// meaningful to create from this row. Delta tables must use
    /// [`QueueConfig::without_trailing_blank`](optisync_engine::QueueConfig::without_trailing_blank).
    fn blank() -> Self {
        Self::inherited(Identifier::empty(), "", "")
    }

    fn reverted(&self) -> Option<Self> {
        Some(Self {
            id: Identifier::empty(),
            value: self.parent_value.clone(),
            ..self.clone()
        })
    }
}

/// A node on the flow canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Key assigned by the canvas when the node is drawn.
    pub canvas_key: EntityKey,
    /// Remote identifier; empty until created.
    #[serde(default)]
    pub id: Identifier,
    /// Node kind, such as `request` or `delay`.
    pub kind: String,
    /// Display label.
    pub label: String,
    /// Canvas position.
    #[serde(default)]
    pub position: (i32, i32),
    /// Selection state; never sent to the remote.
    #[serde(default)]
    pub selected: bool,
}

impl FlowNode {
    /// Creates an unsaved request node.
    pub fn new(canvas_key: impl Into<EntityKey>, label: impl Into<String>) -> Self {
        Self {
            canvas_key: canvas_key.into(),
            id: Identifier::empty(),
            kind: "request".into(),
            label: label.into(),
            position: (0, 0),
            selected: false,
        }
    }
}

impl Entity for FlowNode {
    const TRANSIENT_FIELDS: &'static [&'static str] = &["canvas_key", "selected"];

    fn identifier(&self) -> &Identifier {
        &self.id
    }

    fn set_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn key(&self) -> EntityKey {
        self.canvas_key.clone()
    }
}

/// A directed edge on the flow canvas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Key assigned by the canvas when the edge is drawn.
    pub canvas_key: EntityKey,
    /// Remote identifier; empty until created.
    #[serde(default)]
    pub id: Identifier,
    /// Canvas key of the source node.
    pub source: EntityKey,
    /// Canvas key of the target node.
    pub target: EntityKey,
    /// Remote identifier of the source node, bound before create.
    #[serde(default)]
    pub source_id: Identifier,
    /// Remote identifier of the target node, bound before create.
    #[serde(default)]
    pub target_id: Identifier,
}

impl FlowEdge {
    /// Creates an unsaved edge between two node keys.
    pub fn new(
        canvas_key: impl Into<EntityKey>,
        source: impl Into<EntityKey>,
        target: impl Into<EntityKey>,
    ) -> Self {
        Self {
            canvas_key: canvas_key.into(),
            id: Identifier::empty(),
            source: source.into(),
            target: target.into(),
            source_id: Identifier::empty(),
            target_id: Identifier::empty(),
        }
    }
}

impl Entity for FlowEdge {
    const TRANSIENT_FIELDS: &'static [&'static str] = &["canvas_key", "source_id", "target_id"];

    fn identifier(&self) -> &Identifier {
        &self.id
    }

    fn set_identifier(&mut self, id: Identifier) {
        self.id = id;
    }

    fn key(&self) -> EntityKey {
        self.canvas_key.clone()
    }
}

impl GraphEdge for FlowEdge {
    fn source(&self) -> &EntityKey {
        &self.source
    }

    fn target(&self) -> &EntityKey {
        &self.target
    }

    fn bind_endpoints(&mut self, source: Identifier, target: Identifier) {
        self.source_id = source;
        self.target_id = target;
    }
}

/// Node and edge remotes sharing one call log.
pub type FlowRemote = (MemoryRemote<FlowNode>, MemoryRemote<FlowEdge>);

/// Creates a flow remote and the call log both halves record into.
pub fn flow_remote() -> (FlowRemote, CallLog) {
    let log = CallLog::new();
    let remote = (
        MemoryRemote::with_log("nodes", log.clone()),
        MemoryRemote::with_log("edges", log.clone()),
    );
    (remote, log)
}

/// An empty flow canvas.
pub fn flow_graph() -> FlowGraph<FlowNode, FlowEdge> {
    FlowGraph::new()
}

/// A header table holding `rows`.
pub fn header_table(rows: Vec<HeaderRow>) -> ObservableCollection<HeaderRow> {
    ObservableCollection::new(rows)
}

/// A parameter table inheriting every `(name, value)` pair from fresh
/// parent parameters.
///
/// Queue it with `QueueConfig::without_trailing_blank`.
pub fn delta_table(params: &[(&str, &str)]) -> ObservableCollection<DeltaRow> {
    ObservableCollection::new(
        params
            .iter()
            .map(|(name, value)| DeltaRow::inherited(Identifier::generate(), *name, *value))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use optisync_engine::{QueueConfig, TaskQueue};
    use serde_json::json;

    #[test]
    fn header_normalize_ignores_identifier() {
        let mut saved = HeaderRow::new("Accept", "*/*");
        saved.id = Identifier::generate();
        assert_eq!(saved.normalize(), HeaderRow::new("Accept", "*/*").normalize());
        assert_eq!(
            saved.normalize(),
            json!({"name": "Accept", "value": "*/*", "enabled": true})
        );
    }

    #[test]
    fn delta_row_keys_by_parent() {
        let parent = Identifier::generate();
        let mut row = DeltaRow::inherited(parent, "limit", "10");
        assert_eq!(row.key(), EntityKey::from(&parent));
        assert!(!row.is_overridden());

        row.value = "20".into();
        row.id = Identifier::generate();
        assert_eq!(row.key(), EntityKey::from(&parent));

        let reverted = row.reverted().unwrap();
        assert!(reverted.is_unsaved());
        assert_eq!(reverted.value, "10");
        assert_eq!(reverted.key(), row.key());
    }

    #[test]
    fn delta_table_queues_without_blank_row() {
        assert_eq!(DeltaRow::blank().key(), EntityKey::unsaved());

        let rows = delta_table(&[("limit", "10"), ("page", "1")]);
        let queue = TaskQueue::new(
            rows,
            MemoryRemote::new("params"),
            QueueConfig::manual().without_trailing_blank(),
        );
        assert_eq!(queue.rows().len(), 2);
        assert!(queue
            .rows()
            .items()
            .iter()
            .all(|row| !row.parent_id.is_empty() && row.key() != EntityKey::unsaved()));
    }

    #[test]
    fn node_selection_is_transient() {
        let mut node = FlowNode::new("n1", "Login");
        let before = node.normalize();
        node.selected = true;
        assert_eq!(node.normalize(), before);
        node.label = "Sign in".into();
        assert_ne!(node.normalize(), before);
    }

    #[test]
    fn edge_binding_is_transient() {
        let mut edge = FlowEdge::new("e1", "n1", "n2");
        let before = edge.normalize();
        edge.bind_endpoints(Identifier::generate(), Identifier::generate());
        assert_eq!(edge.normalize(), before);
        assert!(edge.touches(&"n2".into()));
    }

    #[test]
    fn flow_remote_shares_log() {
        let ((nodes, edges), log) = flow_remote();
        assert!(nodes.log().is_empty());
        assert!(edges.log().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn header_deserializes_with_defaults() {
        let row: HeaderRow = serde_json::from_value(json!({"name": "a", "value": "b"})).unwrap();
        assert!(row.is_unsaved());
        assert!(row.enabled);
    }
}
