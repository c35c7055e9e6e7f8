//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::condition::ConditionParseError;

/// Raised synchronously by the builder and graph model on an invalid
/// mutation. The graph is left unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphStructureError {
    /// The node type string is not one of the closed set.
    #[error("unknown node type: '{0}'")]
    UnknownNodeType(String),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// Two or more edges share the same ID.
    #[error("duplicate edge ID: '{0}'")]
    DuplicateEdgeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    #[error("node not found: '{0}'")]
    NodeNotFound(String),

    #[error("node id '{found}' does not match '{expected}'")]
    NodeIdMismatch { expected: String, found: String },

    #[error("edge not found: '{0}'")]
    EdgeNotFound(String),

    #[error("workflow not found: '{0}'")]
    WorkflowNotFound(String),

    #[error("workflow name must not be empty")]
    EmptyWorkflowName,

    #[error(transparent)]
    InvalidCondition(#[from] ConditionParseError),
}

/// Errors produced by the execution engine's control surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}
