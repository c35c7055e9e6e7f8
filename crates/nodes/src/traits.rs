//! The `OperationHandler` trait — the contract every node operation must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::NodeError;

/// Per-invocation context passed to a handler.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the workflow definition being run.
    pub workflow_id: String,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// ID of the node this invocation belongs to.
    pub node_id: String,
    /// Output of the upstream node (or the combined branch outputs for a merge).
    pub input: Value,
    /// Snapshot of the shared execution context taken at dispatch time.
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    /// Look up a dotted path (`aiResult.riskLevel`, `items.0.id`) in the
    /// context snapshot.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.variables, path)
    }
}

/// Resolve a dotted path against a JSON object; numeric segments index
/// arrays.
pub fn lookup_path<'a>(variables: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = variables.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The core handler trait.
///
/// Hosts register one implementation per operation name; the engine looks it
/// up by `node.data.operation` and never branches on the name itself.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Run the operation against the context and the node's `config`
    /// (`Value::Null` when the node has none) and return its output.
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError>;

    /// Context key the output is stored under. `None` means the node id.
    fn output_key(&self) -> Option<&str> {
        None
    }
}
