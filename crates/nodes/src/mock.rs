//! `MockHandler` — a test double for `OperationHandler`.
//!
//! Useful in unit and integration tests where a real operation is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{traits::ExecutionContext, NodeError, OperationHandler};

/// Behaviour injected into `MockHandler` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Failed` error.
    Fail(String),
    /// Sleep, then return the value.
    Delayed(Duration, Value),
    /// Sleep, then fail.
    DelayedFail(Duration, String),
}

/// A mock handler that records every call it receives and returns a
/// programmer-specified result.
pub struct MockHandler {
    /// Label used in test assertions.
    pub name: String,
    /// What the handler will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Optional context key for the output.
    pub key: Option<String>,
    /// All upstream inputs seen by this handler (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockHandler {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            key: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that sleeps for `delay` before succeeding.
    pub fn delayed(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Delayed(delay, value))
    }

    /// Create a mock that sleeps for `delay` before failing.
    pub fn delayed_failing(name: impl Into<String>, delay: Duration, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::DelayedFail(delay, msg.into()))
    }

    /// Store the output under `key` instead of the node id.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Shared handle to the call log, usable after the mock is moved into a
    /// registry.
    pub fn call_log(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn output(&self, v: &Value) -> Value {
        // Tag the output with the mock's name so tests can trace data flow.
        let mut out = json!({ "handler": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        out
    }
}

#[async_trait]
impl OperationHandler for MockHandler {
    async fn execute(&self, ctx: &ExecutionContext, _config: &Value) -> Result<Value, NodeError> {
        self.calls.lock().unwrap().push(ctx.input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::Fail(msg) => Err(NodeError::Failed(msg.clone())),
            MockBehaviour::Delayed(delay, v) => {
                tokio::time::sleep(*delay).await;
                Ok(self.output(v))
            }
            MockBehaviour::DelayedFail(delay, msg) => {
                tokio::time::sleep(*delay).await;
                Err(NodeError::Failed(msg.clone()))
            }
        }
    }

    fn output_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}
