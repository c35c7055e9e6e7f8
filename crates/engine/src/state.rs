//! Per-run execution state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a run: `pending → running → completed | failed | cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown execution status: '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors recorded during a run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The handler returned an error.
    Operation,
    /// A node or the whole run exceeded its time limit.
    Timeout,
    /// Pre-run validation rejected the definition.
    Validation,
    /// The engine itself failed (e.g. a node task panicked).
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionError {
    /// `None` for run-level errors.
    pub node_id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ExecutionState
// ---------------------------------------------------------------------------

/// Snapshot-able record of one run. Owned by the engine; callers only ever
/// see clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_node: Option<String>,
    /// Append-only, in completion order.
    pub executed_nodes: Vec<String>,
    pub errors: Vec<NodeExecutionError>,
    /// `input` holds the run input; every node output lands under its key.
    pub context: Map<String, Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(execution_id: Uuid, workflow_id: impl Into<String>, input: Value) -> Self {
        let mut context = Map::new();
        context.insert("input".to_owned(), input);
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            current_node: None,
            executed_nodes: Vec::new(),
            errors: Vec::new(),
            context,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_error(&mut self, node_id: Option<&str>, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(NodeExecutionError {
            node_id: node_id.map(str::to_owned),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Move to `running`. Ignored unless still pending.
    pub fn start(&mut self) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        true
    }

    /// Move to a terminal status. Returns false, leaving the state alone,
    /// when the run already ended.
    pub fn finish(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.current_node = None;
        self.completed_at = Some(Utc::now());
        true
    }
}
