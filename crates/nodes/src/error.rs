//! Node-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by an operation handler's `execute` method.
///
/// The engine never retries. Every variant is recorded against the node and
/// routed along the node's `"error"` edges if it has any:
/// - `Timeout` is recorded with the `timeout` kind.
/// - everything else is recorded as an operation failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// The operation ran and reported a failure.
    #[error("operation failed: {0}")]
    Failed(String),

    /// No handler is registered under the node's operation name.
    #[error("no handler registered for operation '{0}'")]
    UnknownOperation(String),

    /// The handler did not finish within its time budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The node's `config` object could not be understood by the handler.
    #[error("invalid node config: {0}")]
    InvalidConfig(String),
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
