//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They serialise to/from camelCase JSON, so a definition exported by
//! the builder can be loaded back by the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::{Condition, EdgeCondition};
use crate::error::GraphStructureError;

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// The closed set of node kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Start,
    End,
    DataInput,
    DataProcessor,
    AiAgent,
    /// Decision node; routes along `"true"` / `"false"` edges.
    If,
    /// Explicit fan-out point.
    Split,
    /// Fan-in barrier.
    Merge,
    Action,
    Notification,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        Self::Start,
        Self::End,
        Self::DataInput,
        Self::DataProcessor,
        Self::AiAgent,
        Self::If,
        Self::Split,
        Self::Merge,
        Self::Action,
        Self::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::DataInput => "dataInput",
            Self::DataProcessor => "dataProcessor",
            Self::AiAgent => "aiAgent",
            Self::If => "if",
            Self::Split => "split",
            Self::Merge => "merge",
            Self::Action => "action",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GraphStructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GraphStructureError::UnknownNodeType(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Payload of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    /// Registered handler name to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Arbitrary configuration passed to the handler at execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    /// Decision predicate for `if` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// Canvas position. Cosmetic, ignored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            data: NodeData::default(),
            position: None,
        }
    }

    /// Look up a key in the node's config object.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.data.config.as_ref().and_then(|c| c.get(key))
    }

    /// Node is a fan-out point by type or by operation.
    pub fn is_split(&self) -> bool {
        self.node_type == NodeType::Split || self.data.operation.as_deref() == Some("split")
    }

    /// Node is a fan-in point by type or by operation.
    pub fn is_merge(&self) -> bool {
        self.node_type == NodeType::Merge || self.data.operation.as_deref() == Some("merge")
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }

    pub fn is_error_edge(&self) -> bool {
        matches!(self.condition, Some(EdgeCondition::OnError))
    }
}

// ---------------------------------------------------------------------------
// Split / merge configuration
// ---------------------------------------------------------------------------

/// How a merge node folds its branch outputs into one input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Object keyed by the upstream node id.
    #[default]
    Combine,
    /// Output of the first arrival.
    First,
    /// Array of outputs in arrival order.
    Collect,
}

/// `config` of a merge node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeConfig {
    pub wait_for_all: bool,
    pub strategy: MergeStrategy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            wait_for_all: true,
            strategy: MergeStrategy::Combine,
        }
    }
}

/// `config` of a fan-out node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SplitConfig {
    /// Branches must all reach a common merge.
    pub wait_for_all: bool,
    /// The merge node the branches are meant to join at.
    pub merge_node: Option<String>,
}

impl MergeConfig {
    /// Parse from a node's config; a missing config yields the defaults.
    pub fn from_node(node: &Node) -> Result<Self, serde_json::Error> {
        parse_config(node)
    }
}

impl SplitConfig {
    pub fn from_node(node: &Node) -> Result<Self, serde_json::Error> {
        parse_config(node)
    }
}

fn parse_config<T>(node: &Node) -> Result<T, serde_json::Error>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match &node.data.config {
        None | Some(Value::Null) => Ok(T::default()),
        Some(config) => serde_json::from_value(config.clone()),
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            nodes,
            edges,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_type_parses_the_closed_set_only() {
        assert_eq!("aiAgent".parse::<NodeType>().unwrap(), NodeType::AiAgent);
        assert_eq!("if".parse::<NodeType>().unwrap(), NodeType::If);
        assert!(matches!(
            "bogus".parse::<NodeType>(),
            Err(GraphStructureError::UnknownNodeType(t)) if t == "bogus"
        ));
    }

    #[test]
    fn definition_deserialises_from_camel_case_json() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "wf-1",
            "name": "triage",
            "nodes": [
                { "id": "start", "type": "start", "data": { "label": "Start" } },
                { "id": "check", "type": "if", "data": {
                    "label": "High risk?",
                    "condition": { "path": "aiResult.riskLevel", "operator": "eq", "value": "high" }
                }},
                { "id": "end", "type": "end", "position": { "x": 10.0, "y": 20.0 } }
            ],
            "edges": [
                { "id": "e1", "source": "start", "target": "check" },
                { "id": "e2", "source": "check", "target": "end", "condition": "true" },
                { "id": "e3", "source": "check", "target": "end", "condition": "score > 3" }
            ]
        }))
        .expect("definition should parse");

        assert_eq!(def.nodes[1].node_type, NodeType::If);
        assert!(def.nodes[1].data.condition.is_some());
        assert_eq!(def.edges[1].condition, Some(EdgeCondition::OnTrue));
        assert!(matches!(def.edges[2].condition, Some(EdgeCondition::Predicate(_))));
    }

    #[test]
    fn node_condition_accepts_text_or_structured_form() {
        let from_text: Node = serde_json::from_value(json!({
            "id": "check", "type": "if", "data": { "condition": "aiResult.riskLevel === 'high'" }
        }))
        .unwrap();
        let from_struct: Node = serde_json::from_value(json!({
            "id": "check", "type": "if",
            "data": { "condition": { "path": "aiResult.riskLevel", "operator": "eq", "value": "high" } }
        }))
        .unwrap();
        assert_eq!(from_text, from_struct);

        let written = serde_json::to_value(&from_text).unwrap();
        assert_eq!(written["data"]["condition"]["operator"], "eq");

        let bad = serde_json::from_value::<Node>(json!({
            "id": "check", "type": "if", "data": { "condition": "process.exit()" }
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn merge_config_defaults_to_wait_for_all_combine() {
        let node = Node::new("m", NodeType::Merge);
        let cfg = MergeConfig::from_node(&node).unwrap();
        assert!(cfg.wait_for_all);
        assert_eq!(cfg.strategy, MergeStrategy::Combine);

        let mut node = Node::new("m", NodeType::Merge);
        node.data.config = Some(json!({ "waitForAll": false, "strategy": "first" }));
        let cfg = MergeConfig::from_node(&node).unwrap();
        assert!(!cfg.wait_for_all);
        assert_eq!(cfg.strategy, MergeStrategy::First);
    }
}
