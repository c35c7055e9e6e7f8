//! Built-in operations a host can opt into via
//! [`HandlerRegistry::with_builtins`](crate::HandlerRegistry::with_builtins).

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::{ExecutionContext, HandlerRegistry, NodeError, OperationHandler};

pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry
        .register("log", LogHandler)
        .register("alert", AlertHandler)
        .register("transform", TransformHandler)
        .register("validate", ValidateHandler)
        .register("fallback", FallbackHandler)
        .register("split", PassThrough)
        .register("merge", PassThrough);
}

fn message_from(config: &Value, default: &str) -> String {
    config
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_owned()
}

/// Emits the upstream input at `info` level and passes it through.
pub struct LogHandler;

#[async_trait]
impl OperationHandler for LogHandler {
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError> {
        let message = message_from(config, "workflow log");
        info!(
            execution_id = %ctx.execution_id,
            node_id = %ctx.node_id,
            input = %ctx.input,
            "{message}"
        );
        Ok(ctx.input.clone())
    }
}

/// Raises a `warn` level alert and reports what was sent.
pub struct AlertHandler;

#[async_trait]
impl OperationHandler for AlertHandler {
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError> {
        let message = message_from(config, "workflow alert");
        let channel = config
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("default");
        warn!(
            execution_id = %ctx.execution_id,
            node_id = %ctx.node_id,
            channel,
            "{message}"
        );
        Ok(json!({ "alerted": true, "channel": channel, "message": message }))
    }
}

/// Merges the `config.set` object into the upstream input object.
pub struct TransformHandler;

#[async_trait]
impl OperationHandler for TransformHandler {
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError> {
        let mut out = match &ctx.input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_owned(), other.clone());
                map
            }
        };

        match config.get("set") {
            None | Some(Value::Null) => {}
            Some(Value::Object(set)) => {
                for (key, value) in set {
                    out.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                return Err(NodeError::InvalidConfig(format!(
                    "'set' must be an object, got {other}"
                )))
            }
        }

        Ok(Value::Object(out))
    }
}

/// Fails unless every field named in `config.required` is present and
/// non-null in the upstream input.
pub struct ValidateHandler;

#[async_trait]
impl OperationHandler for ValidateHandler {
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError> {
        let required = match config.get("required") {
            None => return Ok(ctx.input.clone()),
            Some(Value::Array(fields)) => fields,
            Some(other) => {
                return Err(NodeError::InvalidConfig(format!(
                    "'required' must be an array of field names, got {other}"
                )))
            }
        };

        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| ctx.input.get(*field).map_or(true, Value::is_null))
            .collect();

        if missing.is_empty() {
            Ok(ctx.input.clone())
        } else {
            Err(NodeError::failed(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Recovery step: emits `config.value` when configured, otherwise a marker
/// carrying the upstream error.
pub struct FallbackHandler;

#[async_trait]
impl OperationHandler for FallbackHandler {
    async fn execute(&self, ctx: &ExecutionContext, config: &Value) -> Result<Value, NodeError> {
        if let Some(value) = config.get("value") {
            return Ok(value.clone());
        }
        Ok(json!({
            "recovered": true,
            "error": ctx.input.get("error").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// Used for `split` and `merge`; the engine does the routing and combining.
pub struct PassThrough;

#[async_trait]
impl OperationHandler for PassThrough {
    async fn execute(&self, ctx: &ExecutionContext, _config: &Value) -> Result<Value, NodeError> {
        Ok(ctx.input.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx(input: Value) -> ExecutionContext {
        ExecutionContext {
            workflow_id: "wf".into(),
            execution_id: Uuid::new_v4(),
            node_id: "n1".into(),
            input,
            variables: Map::new(),
        }
    }

    #[tokio::test]
    async fn transform_sets_fields_on_input() {
        let out = TransformHandler
            .execute(&ctx(json!({ "id": "P1" })), &json!({ "set": { "stage": "triaged" } }))
            .await
            .expect("transform should succeed");
        assert_eq!(out, json!({ "id": "P1", "stage": "triaged" }));
    }

    #[tokio::test]
    async fn transform_rejects_non_object_set() {
        let err = TransformHandler
            .execute(&ctx(json!({})), &json!({ "set": 3 }))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn validate_reports_missing_fields() {
        let err = ValidateHandler
            .execute(&ctx(json!({ "id": "P1", "age": null })), &json!({ "required": ["id", "age", "name"] }))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::Failed("missing required fields: age, name".into()));
    }

    #[tokio::test]
    async fn fallback_prefers_configured_value() {
        let out = FallbackHandler
            .execute(&ctx(json!({ "error": "boom" })), &json!({ "value": { "score": 0 } }))
            .await
            .unwrap();
        assert_eq!(out, json!({ "score": 0 }));

        let out = FallbackHandler
            .execute(&ctx(json!({ "error": "boom" })), &Value::Null)
            .await
            .unwrap();
        assert_eq!(out, json!({ "recovered": true, "error": "boom" }));
    }

    #[test]
    fn context_lookup_walks_objects_and_arrays() {
        let mut c = ctx(Value::Null);
        c.variables.insert("items".into(), json!([{ "id": "a" }, { "id": "b" }]));
        assert_eq!(c.lookup("items.1.id"), Some(&json!("b")));
        assert_eq!(c.lookup("items.9.id"), None);
        assert_eq!(c.lookup("nope"), None);
    }
}
