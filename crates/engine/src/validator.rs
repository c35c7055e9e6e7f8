//! Workflow validation, run before a workflow executes.
//!
//! [`validate_workflow`] never fails and never short-circuits: every defect
//! found is collected into the report, each attributed to the node or edge
//! that causes it. Checks run in this order:
//!
//! 1. Structure: unique ids, resolvable edge endpoints, exactly one `start`,
//!    an `end` reachable from `start`.
//! 2. Reachability: every node reachable from `start`.
//! 3. Cycles: traversal is single-pass, so every back edge is an error.
//! 4. Decision coverage on `if` nodes.
//! 5. Split/merge pairing for fan-outs configured with `waitForAll`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::condition::EdgeCondition;
use crate::graph::Graph;
use crate::models::{MergeConfig, NodeType, SplitConfig, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCode {
    DuplicateNodeId,
    DuplicateEdgeId,
    DanglingEdge,
    MissingStart,
    MultipleStart,
    NoReachableEnd,
    UnreachableNode,
    Cycle,
    DecisionWithoutPath,
    DecisionWithoutFallback,
    SplitWithoutMerge,
    InvalidNodeConfig,
}

/// One defect, attributable to a node and/or edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// False iff at least one error-severity finding exists.
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| e.severity == Severity::Warning)
    }

    pub fn fatal(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter().filter(|e| e.severity == Severity::Error)
    }

    /// One line per error-severity finding.
    pub fn summary(&self) -> String {
        self.fatal().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ")
    }
}

#[derive(Default)]
struct Findings(Vec<ValidationError>);

impl Findings {
    fn push(
        &mut self,
        code: ValidationCode,
        severity: Severity,
        node_id: Option<&str>,
        edge_id: Option<&str>,
        message: String,
    ) {
        self.0.push(ValidationError {
            code,
            severity,
            node_id: node_id.map(str::to_owned),
            edge_id: edge_id.map(str::to_owned),
            message,
        });
    }

    fn node_error(&mut self, code: ValidationCode, node_id: &str, message: String) {
        self.push(code, Severity::Error, Some(node_id), None, message);
    }

    fn edge_error(&mut self, code: ValidationCode, node_id: &str, edge_id: &str, message: String) {
        self.push(code, Severity::Error, Some(node_id), Some(edge_id), message);
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Validate a definition, collecting every finding.
pub fn validate_workflow(definition: &WorkflowDefinition) -> ValidationReport {
    let graph = Graph::new(definition);
    let mut findings = Findings::default();

    let starts = check_structure(definition, &graph, &mut findings);
    if !starts.is_empty() {
        check_reachability(&graph, &starts, &mut findings);
    }
    check_cycles(&graph, &mut findings);
    check_decisions(&graph, &mut findings);
    check_split_merge(&graph, &mut findings);

    let errors = findings.0;
    ValidationReport {
        is_valid: errors.iter().all(|e| e.severity != Severity::Error),
        errors,
    }
}

// ---------------------------------------------------------------------------
// 1. Structure
// ---------------------------------------------------------------------------

/// Returns the ids of every start node, in definition order.
fn check_structure(
    definition: &WorkflowDefinition,
    graph: &Graph,
    findings: &mut Findings,
) -> Vec<String> {
    let mut seen_nodes: HashSet<&str> = HashSet::new();
    for node in &definition.nodes {
        if !seen_nodes.insert(node.id.as_str()) {
            findings.node_error(
                ValidationCode::DuplicateNodeId,
                &node.id,
                format!("duplicate node ID: '{}'", node.id),
            );
        }
    }

    let mut seen_edges: HashSet<&str> = HashSet::new();
    for edge in &definition.edges {
        if !seen_edges.insert(edge.id.as_str()) {
            findings.push(
                ValidationCode::DuplicateEdgeId,
                Severity::Error,
                None,
                Some(&edge.id),
                format!("duplicate edge ID: '{}'", edge.id),
            );
        }
        for (side, endpoint) in [("source", &edge.source), ("target", &edge.target)] {
            if !seen_nodes.contains(endpoint.as_str()) {
                findings.edge_error(
                    ValidationCode::DanglingEdge,
                    endpoint,
                    &edge.id,
                    format!("edge '{}' references unknown node '{endpoint}' ({side} side)", edge.id),
                );
            }
        }
    }

    let starts: Vec<String> = graph.nodes_of_type(NodeType::Start).map(|n| n.id.clone()).collect();
    match starts.as_slice() {
        [] => findings.push(
            ValidationCode::MissingStart,
            Severity::Error,
            None,
            None,
            "workflow has no start node".to_owned(),
        ),
        [_] => {}
        [_, extra @ ..] => {
            for id in extra {
                findings.node_error(
                    ValidationCode::MultipleStart,
                    id,
                    format!("node '{id}' is an additional start node; exactly one is allowed"),
                );
            }
        }
    }

    for start in &starts {
        let reachable = graph.reachable_from(start);
        let end_reachable = graph
            .nodes_of_type(NodeType::End)
            .any(|n| reachable.contains(&n.id));
        if !end_reachable {
            findings.node_error(
                ValidationCode::NoReachableEnd,
                start,
                format!("no end node is reachable from start node '{start}'"),
            );
        }
    }

    starts
}

// ---------------------------------------------------------------------------
// 2. Reachability
// ---------------------------------------------------------------------------

/// Every node must be reachable from at least one start node.
fn check_reachability(graph: &Graph, starts: &[String], findings: &mut Findings) {
    let reachable: HashSet<String> = starts.iter().flat_map(|s| graph.reachable_from(s)).collect();
    for node in graph.nodes() {
        if !reachable.contains(&node.id) {
            findings.node_error(
                ValidationCode::UnreachableNode,
                &node.id,
                format!("node '{}' is not reachable from start", node.id),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Cycles
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

/// Iterative depth-first search; each edge that closes onto the current
/// path is reported.
fn check_cycles(graph: &Graph, findings: &mut Findings) {
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in graph.nodes() {
        if marks.contains_key(root.id.as_str()) {
            continue;
        }
        // (node id, index of the next outgoing edge to visit)
        let mut stack: Vec<(&str, usize)> = vec![(root.id.as_str(), 0)];
        marks.insert(root.id.as_str(), Mark::InProgress);

        while let Some(top) = stack.last_mut() {
            let (node_id, position) = *top;
            top.1 += 1;
            let Some(edge) = graph.outgoing(node_id).get(position) else {
                marks.insert(node_id, Mark::Done);
                stack.pop();
                continue;
            };

            match marks.get(edge.target.as_str()) {
                Some(Mark::InProgress) => findings.edge_error(
                    ValidationCode::Cycle,
                    &edge.source,
                    &edge.id,
                    format!(
                        "edge '{}' ({} -> {}) closes a cycle",
                        edge.id, edge.source, edge.target
                    ),
                ),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(edge.target.as_str(), Mark::InProgress);
                    stack.push((edge.target.as_str(), 0));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Decision coverage
// ---------------------------------------------------------------------------

/// An `if` node needs at least one non-error outgoing edge. If none of its
/// edges is always eligible (unconditional, or a `true`/`false` pair), the
/// false path may be silently abandoned; that is reported as a warning.
fn check_decisions(graph: &Graph, findings: &mut Findings) {
    for node in graph.nodes_of_type(NodeType::If) {
        let routes: Vec<_> = graph
            .outgoing(&node.id)
            .iter()
            .filter(|e| !e.is_error_edge())
            .collect();

        if routes.is_empty() {
            findings.node_error(
                ValidationCode::DecisionWithoutPath,
                &node.id,
                format!("decision node '{}' has no outgoing path", node.id),
            );
            continue;
        }

        let has_unconditional = routes.iter().any(|e| e.is_unconditional());
        let has_true = routes.iter().any(|e| e.condition == Some(EdgeCondition::OnTrue));
        let has_false = routes.iter().any(|e| e.condition == Some(EdgeCondition::OnFalse));
        if has_unconditional || (has_true && has_false) {
            continue;
        }

        findings.push(
            ValidationCode::DecisionWithoutFallback,
            Severity::Warning,
            Some(&node.id),
            routes.first().map(|e| e.id.as_str()),
            format!(
                "decision node '{}' has no fallback path; the run ends there when no condition holds",
                node.id
            ),
        );
    }
}

// ---------------------------------------------------------------------------
// 5. Split / merge pairing
// ---------------------------------------------------------------------------

fn check_split_merge(graph: &Graph, findings: &mut Findings) {
    for node in graph.nodes() {
        if node.is_merge() {
            if let Err(e) = MergeConfig::from_node(node) {
                findings.node_error(
                    ValidationCode::InvalidNodeConfig,
                    &node.id,
                    format!("merge node '{}' has invalid config: {e}", node.id),
                );
            }
        }

        if !graph.is_fan_out(&node.id) {
            continue;
        }
        let config = match SplitConfig::from_node(node) {
            Ok(config) => config,
            Err(e) => {
                findings.node_error(
                    ValidationCode::InvalidNodeConfig,
                    &node.id,
                    format!("split node '{}' has invalid config: {e}", node.id),
                );
                continue;
            }
        };
        if !config.wait_for_all {
            continue;
        }

        let branches: Vec<&str> = graph
            .outgoing(&node.id)
            .iter()
            .filter(|e| !e.is_error_edge())
            .map(|e| e.target.as_str())
            .collect();
        let reach: Vec<HashSet<String>> = branches.iter().map(|b| graph.reachable_from(b)).collect();

        let joined = match config.merge_node.as_deref() {
            Some(merge_id) => {
                if graph.node(merge_id).is_none() {
                    findings.node_error(
                        ValidationCode::InvalidNodeConfig,
                        &node.id,
                        format!("split node '{}' names unknown merge node '{merge_id}'", node.id),
                    );
                    continue;
                }
                reach.iter().all(|r| r.contains(merge_id))
            }
            None => graph.nodes().iter().any(|candidate| {
                candidate.is_merge() && reach.iter().all(|r| r.contains(&candidate.id))
            }),
        };

        if !joined {
            findings.node_error(
                ValidationCode::SplitWithoutMerge,
                &node.id,
                format!(
                    "split node '{}' waits for all branches but they do not reach a common merge node",
                    node.id
                ),
            );
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use serde_json::json;

    fn node(id: &str, node_type: NodeType) -> Node {
        Node::new(id, node_type)
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new(format!("{source}->{target}"), source, target)
    }

    fn codes(report: &ValidationReport) -> Vec<ValidationCode> {
        report.errors.iter().map(|e| e.code).collect()
    }

    fn linear() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "linear",
            vec![
                node("start", NodeType::Start),
                node("load", NodeType::DataInput),
                node("end", NodeType::End),
            ],
            vec![edge("start", "load"), edge("load", "end")],
        )
    }

    #[test]
    fn valid_linear_workflow() {
        let report = validate_workflow(&linear());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn duplicate_and_dangling_are_all_reported() {
        let mut wf = linear();
        wf.nodes.push(node("load", NodeType::DataProcessor));
        wf.edges.push(edge("load", "ghost"));
        wf.edges.push(Edge::new("start->load", "start", "end"));

        let report = validate_workflow(&wf);
        assert!(!report.is_valid);
        let found = codes(&report);
        assert!(found.contains(&ValidationCode::DuplicateNodeId));
        assert!(found.contains(&ValidationCode::DanglingEdge));
        assert!(found.contains(&ValidationCode::DuplicateEdgeId));

        let dangling = report
            .errors
            .iter()
            .find(|e| e.code == ValidationCode::DanglingEdge)
            .unwrap();
        assert_eq!(dangling.node_id.as_deref(), Some("ghost"));
        assert_eq!(dangling.edge_id.as_deref(), Some("load->ghost"));
    }

    #[test]
    fn start_count_is_enforced() {
        let wf = WorkflowDefinition::new("no start", vec![node("end", NodeType::End)], vec![]);
        assert_eq!(codes(&validate_workflow(&wf)), vec![ValidationCode::MissingStart]);

        let mut wf = linear();
        wf.nodes.push(node("start2", NodeType::Start));
        wf.edges.push(edge("start2", "end"));
        let report = validate_workflow(&wf);
        assert_eq!(codes(&report), vec![ValidationCode::MultipleStart]);
        assert_eq!(report.errors[0].node_id.as_deref(), Some("start2"));
    }

    #[test]
    fn unreachable_end_and_orphans() {
        let wf = WorkflowDefinition::new(
            "orphaned",
            vec![
                node("start", NodeType::Start),
                node("work", NodeType::DataProcessor),
                node("end", NodeType::End),
            ],
            vec![edge("start", "work")],
        );
        let report = validate_workflow(&wf);
        assert!(!report.is_valid);
        assert_eq!(
            codes(&report),
            vec![ValidationCode::NoReachableEnd, ValidationCode::UnreachableNode]
        );
        assert_eq!(report.errors[1].node_id.as_deref(), Some("end"));
    }

    #[test]
    fn orphans_are_reported_alongside_extra_starts() {
        let mut wf = linear();
        wf.nodes.push(node("start2", NodeType::Start));
        wf.nodes.push(node("orphan", NodeType::DataProcessor));
        wf.edges.push(edge("start2", "end"));

        let report = validate_workflow(&wf);
        assert_eq!(
            codes(&report),
            vec![ValidationCode::MultipleStart, ValidationCode::UnreachableNode]
        );
        assert_eq!(report.errors[1].node_id.as_deref(), Some("orphan"));
    }

    #[test]
    fn extra_start_without_path_to_end_is_reported() {
        let mut wf = linear();
        wf.nodes.push(node("start2", NodeType::Start));

        let report = validate_workflow(&wf);
        assert_eq!(
            codes(&report),
            vec![ValidationCode::MultipleStart, ValidationCode::NoReachableEnd]
        );
        assert_eq!(report.errors[1].node_id.as_deref(), Some("start2"));
    }

    #[test]
    fn every_back_edge_is_reported() {
        let mut wf = linear();
        wf.nodes.push(node("retry", NodeType::DataProcessor));
        wf.edges.push(edge("load", "retry"));
        wf.edges.push(edge("retry", "load"));
        wf.edges.push(edge("end", "start"));

        let report = validate_workflow(&wf);
        let cycles: Vec<&str> = report
            .errors
            .iter()
            .filter(|e| e.code == ValidationCode::Cycle)
            .filter_map(|e| e.edge_id.as_deref())
            .collect();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&"retry->load"));
        assert!(cycles.contains(&"end->start"));
    }

    #[test]
    fn decision_coverage() {
        let decision = |edges: Vec<Edge>| {
            let mut all = vec![edge("start", "check")];
            all.extend(edges);
            WorkflowDefinition::new(
                "decision",
                vec![
                    node("start", NodeType::Start),
                    node("check", NodeType::If),
                    node("end", NodeType::End),
                ],
                all,
            )
        };

        let covered = decision(vec![
            edge("check", "end").with_condition(EdgeCondition::OnTrue),
            Edge::new("f", "check", "end").with_condition(EdgeCondition::OnFalse),
        ]);
        assert!(validate_workflow(&covered).errors.is_empty());

        let one_sided = decision(vec![edge("check", "end").with_condition(EdgeCondition::OnTrue)]);
        let report = validate_workflow(&one_sided);
        assert!(report.is_valid);
        assert_eq!(codes(&report), vec![ValidationCode::DecisionWithoutFallback]);
        assert_eq!(report.warnings().count(), 1);

        let dead_end = decision(vec![edge("check", "end").with_condition(EdgeCondition::OnError)]);
        let report = validate_workflow(&dead_end);
        assert!(!report.is_valid);
        assert!(codes(&report).contains(&ValidationCode::DecisionWithoutPath));
    }

    fn split_workflow(split_config: serde_json::Value, join: bool) -> WorkflowDefinition {
        let mut split = node("split", NodeType::Split);
        split.data.config = Some(split_config);
        let mut edges = vec![
            edge("start", "split"),
            edge("split", "a"),
            edge("split", "b"),
            edge("a", "merge"),
            edge("merge", "end"),
        ];
        edges.push(if join { edge("b", "merge") } else { edge("b", "end") });
        WorkflowDefinition::new(
            "split",
            vec![
                node("start", NodeType::Start),
                split,
                node("a", NodeType::DataProcessor),
                node("b", NodeType::DataProcessor),
                node("merge", NodeType::Merge),
                node("end", NodeType::End),
            ],
            edges,
        )
    }

    #[test]
    fn split_with_wait_for_all_needs_common_merge() {
        let ok = split_workflow(json!({ "waitForAll": true }), true);
        assert!(validate_workflow(&ok).is_valid);

        let named = split_workflow(json!({ "waitForAll": true, "mergeNode": "merge" }), true);
        assert!(validate_workflow(&named).is_valid);

        let broken = split_workflow(json!({ "waitForAll": true }), false);
        let report = validate_workflow(&broken);
        assert!(!report.is_valid);
        assert_eq!(codes(&report), vec![ValidationCode::SplitWithoutMerge]);
        assert_eq!(report.errors[0].node_id.as_deref(), Some("split"));

        let relaxed = split_workflow(json!({ "waitForAll": false }), false);
        assert!(validate_workflow(&relaxed).is_valid);
    }

    #[test]
    fn malformed_merge_config_is_reported() {
        let mut wf = split_workflow(json!({}), true);
        let merge = wf.nodes.iter_mut().find(|n| n.id == "merge").unwrap();
        merge.data.config = Some(json!({ "strategy": "zip" }));
        let report = validate_workflow(&wf);
        assert_eq!(codes(&report), vec![ValidationCode::InvalidNodeConfig]);
    }
}
