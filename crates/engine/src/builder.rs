//! Mutation API over one [`GraphModel`] per workflow id.
//!
//! All operations are synchronous. Every failing call returns a
//! [`GraphStructureError`] and leaves the targeted workflow unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::condition::EdgeCondition;
use crate::error::GraphStructureError;
use crate::graph_model::GraphModel;
use crate::models::{Edge, Node, NodeData, NodeType, Position, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// Node as submitted by a caller. The type is free text and is checked
/// against [`NodeType`] before anything is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default)]
    pub position: Option<Position>,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = label.into();
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.data.operation = Some(operation.into());
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.data.config = Some(config);
        self
    }

    pub fn with_condition(mut self, condition: crate::condition::Condition) -> Self {
        self.data.condition = Some(condition);
        self
    }
}

/// Edge as submitted by a caller. `condition` is text: `"error"`, `"true"`,
/// `"false"` or a comparison such as `"aiResult.riskLevel === 'high'"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub condition: Option<String>,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            condition: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Draft {
    name: String,
    description: String,
    graph: GraphModel,
}

/// Owns the mutable drafts of every workflow it created.
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    drafts: HashMap<String, Draft>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an empty workflow and return its id.
    pub fn create_workflow(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<String, GraphStructureError> {
        if name.trim().is_empty() {
            return Err(GraphStructureError::EmptyWorkflowName);
        }
        let id = Uuid::new_v4().to_string();
        self.drafts.insert(
            id.clone(),
            Draft {
                name: name.to_owned(),
                description: description.to_owned(),
                graph: GraphModel::new(),
            },
        );
        debug!(workflow_id = %id, name, "workflow created");
        Ok(id)
    }

    pub fn add_node(&mut self, workflow_id: &str, spec: NodeSpec) -> Result<String, GraphStructureError> {
        let node_type: NodeType = spec.node_type.parse()?;
        let graph = self.graph_mut(workflow_id)?;
        let id = match spec.id {
            Some(id) => id,
            None => graph.fresh_node_id(node_type),
        };
        graph.add_node(Node {
            id: id.clone(),
            node_type,
            data: spec.data,
            position: spec.position,
        })?;
        Ok(id)
    }

    /// Replace a node's type and data. `spec.id`, if given, must match `node_id`.
    pub fn update_node(
        &mut self,
        workflow_id: &str,
        node_id: &str,
        spec: NodeSpec,
    ) -> Result<(), GraphStructureError> {
        let node_type: NodeType = spec.node_type.parse()?;
        if let Some(id) = spec.id.filter(|id| id != node_id) {
            return Err(GraphStructureError::NodeIdMismatch {
                expected: node_id.to_owned(),
                found: id,
            });
        }
        self.graph_mut(workflow_id)?.update_node(node_id, node_type, spec.data)
    }

    /// Remove a node together with all its incident edges.
    pub fn remove_node(&mut self, workflow_id: &str, node_id: &str) -> Result<Node, GraphStructureError> {
        let (node, cascaded) = self.graph_mut(workflow_id)?.remove_node(node_id)?;
        debug!(workflow_id, node_id, cascaded = cascaded.len(), "node removed");
        Ok(node)
    }

    pub fn add_edge(&mut self, workflow_id: &str, spec: EdgeSpec) -> Result<String, GraphStructureError> {
        let condition = spec
            .condition
            .as_deref()
            .map(str::parse::<EdgeCondition>)
            .transpose()?;
        let graph = self.graph_mut(workflow_id)?;
        let id = match spec.id {
            Some(id) => id,
            None => graph.fresh_edge_id(),
        };
        graph.add_edge(Edge {
            id: id.clone(),
            source: spec.source,
            target: spec.target,
            condition,
        })?;
        Ok(id)
    }

    pub fn remove_edge(&mut self, workflow_id: &str, edge_id: &str) -> Result<Edge, GraphStructureError> {
        self.graph_mut(workflow_id)?.remove_edge(edge_id)
    }

    /// Current immutable snapshot, or `None` for an unknown id.
    pub fn get_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.drafts
            .get(workflow_id)
            .map(|d| d.graph.snapshot(workflow_id, &d.name, &d.description))
    }

    /// Ids of all workflows, sorted.
    pub fn list_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.drafts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn delete_workflow(&mut self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.drafts
            .remove(workflow_id)
            .map(|d| d.graph.snapshot(workflow_id, &d.name, &d.description))
    }

    fn graph_mut(&mut self, workflow_id: &str) -> Result<&mut GraphModel, GraphStructureError> {
        self.drafts
            .get_mut(workflow_id)
            .map(|d| &mut d.graph)
            .ok_or_else(|| GraphStructureError::WorkflowNotFound(workflow_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder_with_workflow() -> (WorkflowBuilder, String) {
        let mut builder = WorkflowBuilder::new();
        let id = builder.create_workflow("patient intake", "demo").unwrap();
        (builder, id)
    }

    #[test]
    fn create_workflow_rejects_blank_name() {
        let mut builder = WorkflowBuilder::new();
        assert_eq!(
            builder.create_workflow("   ", "x"),
            Err(GraphStructureError::EmptyWorkflowName)
        );
        assert!(builder.list_workflows().is_empty());
    }

    #[test]
    fn mutations_round_trip_through_snapshot() {
        let (mut builder, wf) = builder_with_workflow();
        let start = builder.add_node(&wf, NodeSpec::new("start").with_id("start")).unwrap();
        let input = builder
            .add_node(&wf, NodeSpec::new("dataInput").with_label("Patient").with_config(json!({ "source": "form" })))
            .unwrap();
        let end = builder.add_node(&wf, NodeSpec::new("end").with_id("end")).unwrap();
        let e1 = builder.add_edge(&wf, EdgeSpec::new(&start, &input)).unwrap();
        let e2 = builder.add_edge(&wf, EdgeSpec::new(&input, &end).when("input.id == 'P1'")).unwrap();

        let def = builder.get_workflow(&wf).expect("workflow exists");
        assert_eq!(def.name, "patient intake");
        let node_ids: Vec<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(node_ids, vec![start.as_str(), input.as_str(), end.as_str()]);
        let edge_ids: Vec<&str> = def.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(edge_ids, vec![e1.as_str(), e2.as_str()]);
        assert_eq!(def.nodes[1].data.label, "Patient");
        assert!(matches!(def.edges[1].condition, Some(EdgeCondition::Predicate(_))));
    }

    #[test]
    fn unknown_node_type_is_rejected_without_mutation() {
        let (mut builder, wf) = builder_with_workflow();
        builder.add_node(&wf, NodeSpec::new("start")).unwrap();

        let err = builder.add_node(&wf, NodeSpec::new("bogus")).unwrap_err();
        assert_eq!(err, GraphStructureError::UnknownNodeType("bogus".into()));
        assert_eq!(builder.get_workflow(&wf).unwrap().nodes.len(), 1);
    }

    #[test]
    fn edge_to_missing_target_is_rejected_without_mutation() {
        let (mut builder, wf) = builder_with_workflow();
        let a = builder.add_node(&wf, NodeSpec::new("start")).unwrap();
        let b = builder.add_node(&wf, NodeSpec::new("end")).unwrap();
        builder.add_edge(&wf, EdgeSpec::new(&a, &b)).unwrap();

        let err = builder.add_edge(&wf, EdgeSpec::new(&a, "nowhere")).unwrap_err();
        assert!(matches!(err, GraphStructureError::UnknownNodeReference { side: "target", .. }));
        assert_eq!(builder.get_workflow(&wf).unwrap().edges.len(), 1);
    }

    #[test]
    fn invalid_condition_text_is_a_structural_error() {
        let (mut builder, wf) = builder_with_workflow();
        let a = builder.add_node(&wf, NodeSpec::new("start")).unwrap();
        let b = builder.add_node(&wf, NodeSpec::new("end")).unwrap();

        let err = builder.add_edge(&wf, EdgeSpec::new(&a, &b).when("process.exit()")).unwrap_err();
        assert!(matches!(err, GraphStructureError::InvalidCondition(_)));
        assert!(builder.get_workflow(&wf).unwrap().edges.is_empty());
    }

    #[test]
    fn update_and_remove_node() {
        let (mut builder, wf) = builder_with_workflow();
        let a = builder.add_node(&wf, NodeSpec::new("start")).unwrap();
        let b = builder.add_node(&wf, NodeSpec::new("dataProcessor")).unwrap();
        builder.add_edge(&wf, EdgeSpec::new(&a, &b)).unwrap();

        builder
            .update_node(&wf, &b, NodeSpec::new("aiAgent").with_operation("classify"))
            .unwrap();
        let def = builder.get_workflow(&wf).unwrap();
        assert_eq!(def.node(&b).unwrap().node_type, NodeType::AiAgent);
        assert_eq!(def.node(&b).unwrap().data.operation.as_deref(), Some("classify"));

        assert!(builder.update_node(&wf, &b, NodeSpec::new("bogus")).is_err());
        assert_eq!(
            builder.get_workflow(&wf).unwrap().node(&b).unwrap().node_type,
            NodeType::AiAgent
        );

        assert_eq!(
            builder.update_node(&wf, &b, NodeSpec::new("action").with_id("renamed")),
            Err(GraphStructureError::NodeIdMismatch {
                expected: b.clone(),
                found: "renamed".into(),
            })
        );
        builder
            .update_node(&wf, &b, NodeSpec::new("action").with_id(&b))
            .unwrap();
        assert_eq!(
            builder.get_workflow(&wf).unwrap().node(&b).unwrap().node_type,
            NodeType::Action
        );

        builder.remove_node(&wf, &b).unwrap();
        let def = builder.get_workflow(&wf).unwrap();
        assert_eq!(def.nodes.len(), 1);
        assert!(def.edges.is_empty());
    }

    #[test]
    fn unknown_workflow() {
        let mut builder = WorkflowBuilder::new();
        assert!(builder.get_workflow("nope").is_none());
        assert_eq!(
            builder.add_node("nope", NodeSpec::new("start")),
            Err(GraphStructureError::WorkflowNotFound("nope".into()))
        );
    }
}
