//! Adjacency view over a definition, for traversal and analysis.
//!
//! Built once per validation or execution. Edges with a dangling endpoint are
//! left out; the validator reports them separately.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Edge, Node, NodeType, WorkflowDefinition};

#[derive(Debug, Clone)]
pub struct Graph {
    /// Nodes in definition order. A duplicated id keeps its first occurrence.
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    /// node_id -> outgoing edges, in definition order.
    outgoing: HashMap<String, Vec<Edge>>,
    /// node_id -> distinct upstream node ids.
    upstream: HashMap<String, Vec<String>>,
}

impl Graph {
    pub fn new(definition: &WorkflowDefinition) -> Self {
        let mut nodes = Vec::with_capacity(definition.nodes.len());
        let mut index = HashMap::new();
        for node in &definition.nodes {
            if !index.contains_key(&node.id) {
                index.insert(node.id.clone(), nodes.len());
                nodes.push(node.clone());
            }
        }

        let mut outgoing: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut upstream: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &definition.edges {
            if !index.contains_key(&edge.source) || !index.contains_key(&edge.target) {
                continue;
            }
            outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
            let ups = upstream.entry(edge.target.clone()).or_default();
            if !ups.contains(&edge.source) {
                ups.push(edge.source.clone());
            }
        }

        Self {
            nodes,
            index,
            outgoing,
            upstream,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn outgoing(&self, id: &str) -> &[Edge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct upstream node ids for a given node.
    pub fn upstream(&self, id: &str) -> &[String] {
        self.upstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.node_type == node_type)
    }

    /// The single `start` node, if there is exactly one.
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self.nodes_of_type(NodeType::Start);
        match (starts.next(), starts.next()) {
            (Some(start), None) => Some(start),
            _ => None,
        }
    }

    /// A node fans out when it is an explicit split or has more than one
    /// unconditional outgoing edge.
    pub fn is_fan_out(&self, id: &str) -> bool {
        let explicit = self.node(id).is_some_and(Node::is_split);
        explicit || self.outgoing(id).iter().filter(|e| e.is_unconditional()).count() > 1
    }

    /// Every node reachable from `from`, `from` included. Follows all edges
    /// regardless of their conditions.
    pub fn reachable_from(&self, from: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        if self.node(from).is_none() {
            return seen;
        }
        let mut queue = VecDeque::from([from.to_owned()]);
        seen.insert(from.to_owned());
        while let Some(id) = queue.pop_front() {
            for edge in self.outgoing(&id) {
                if seen.insert(edge.target.clone()) {
                    queue.push_back(edge.target.clone());
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> WorkflowDefinition {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        WorkflowDefinition::new(
            "diamond",
            vec![
                Node::new("a", NodeType::Start),
                Node::new("b", NodeType::DataProcessor),
                Node::new("c", NodeType::DataProcessor),
                Node::new("d", NodeType::End),
            ],
            vec![
                Edge::new("ab", "a", "b"),
                Edge::new("ac", "a", "c"),
                Edge::new("bd", "b", "d"),
                Edge::new("cd", "c", "d"),
                Edge::new("dangling", "d", "ghost"),
            ],
        )
    }

    #[test]
    fn builds_adjacency_and_skips_dangling_edges() {
        let graph = Graph::new(&diamond());
        assert_eq!(graph.outgoing("a").len(), 2);
        assert!(graph.outgoing("d").is_empty());
        assert_eq!(graph.upstream("d"), ["b".to_string(), "c".to_string()]);
        assert_eq!(graph.start_node().map(|n| n.id.as_str()), Some("a"));
    }

    #[test]
    fn fan_out_and_reachability() {
        let graph = Graph::new(&diamond());
        assert!(graph.is_fan_out("a"));
        assert!(!graph.is_fan_out("b"));

        let reach = graph.reachable_from("b");
        assert!(reach.contains("b") && reach.contains("d"));
        assert!(!reach.contains("c"));
    }
}
