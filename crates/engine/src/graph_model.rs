//! Flat, id-indexed storage of nodes and edges.
//!
//! Nodes and edges live in insertion-ordered arenas with an id → slot index
//! beside each. Relationships are ids, never references, so the model is
//! trivially serialisable. The only rule enforced here is referential
//! integrity; every failing mutation leaves the model untouched.

use std::collections::HashMap;

use crate::error::GraphStructureError;
use crate::models::{Edge, Node, NodeData, NodeType, WorkflowDefinition};

#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<String, usize>,
    next_id: u64,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edge_index.get(id).map(|&i| &self.edges[i])
    }

    /// A node id not yet used in this model, e.g. `dataInput-3`.
    pub fn fresh_node_id(&mut self, node_type: NodeType) -> String {
        loop {
            self.next_id += 1;
            let id = format!("{node_type}-{}", self.next_id);
            if !self.node_index.contains_key(&id) {
                return id;
            }
        }
    }

    /// An edge id not yet used in this model, e.g. `edge-4`.
    pub fn fresh_edge_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let id = format!("edge-{}", self.next_id);
            if !self.edge_index.contains_key(&id) {
                return id;
            }
        }
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphStructureError> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphStructureError::DuplicateNodeId(node.id));
        }
        self.node_index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Replace a node's type and payload. The id and position are kept.
    pub fn update_node(
        &mut self,
        id: &str,
        node_type: NodeType,
        data: NodeData,
    ) -> Result<(), GraphStructureError> {
        let &slot = self
            .node_index
            .get(id)
            .ok_or_else(|| GraphStructureError::NodeNotFound(id.to_owned()))?;
        let node = &mut self.nodes[slot];
        node.node_type = node_type;
        node.data = data;
        Ok(())
    }

    /// Remove a node and every edge touching it. Returns the removed node and
    /// the cascaded edges.
    pub fn remove_node(&mut self, id: &str) -> Result<(Node, Vec<Edge>), GraphStructureError> {
        let slot = self
            .node_index
            .remove(id)
            .ok_or_else(|| GraphStructureError::NodeNotFound(id.to_owned()))?;
        let node = self.nodes.remove(slot);
        Self::reindex(&self.nodes, &mut self.node_index, |n| &n.id);

        let (incident, kept): (Vec<Edge>, Vec<Edge>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|e| e.source == id || e.target == id);
        self.edges = kept;
        Self::reindex(&self.edges, &mut self.edge_index, |e| &e.id);

        Ok((node, incident))
    }

    /// Add an edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphStructureError> {
        if self.edge_index.contains_key(&edge.id) {
            return Err(GraphStructureError::DuplicateEdgeId(edge.id));
        }
        if !self.node_index.contains_key(&edge.source) {
            return Err(GraphStructureError::UnknownNodeReference {
                node_id: edge.source,
                side: "source",
            });
        }
        if !self.node_index.contains_key(&edge.target) {
            return Err(GraphStructureError::UnknownNodeReference {
                node_id: edge.target,
                side: "target",
            });
        }
        self.edge_index.insert(edge.id.clone(), self.edges.len());
        self.edges.push(edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &str) -> Result<Edge, GraphStructureError> {
        let slot = self
            .edge_index
            .remove(id)
            .ok_or_else(|| GraphStructureError::EdgeNotFound(id.to_owned()))?;
        let edge = self.edges.remove(slot);
        Self::reindex(&self.edges, &mut self.edge_index, |e| &e.id);
        Ok(edge)
    }

    /// Immutable copy of the current graph as a definition.
    pub fn snapshot(&self, id: &str, name: &str, description: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    fn reindex<T>(items: &[T], index: &mut HashMap<String, usize>, key: impl Fn(&T) -> &String) {
        index.clear();
        index.extend(items.iter().enumerate().map(|(i, item)| (key(item).clone(), i)));
    }
}
