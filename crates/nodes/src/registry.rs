//! String-keyed handler registry supplied by the host application.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::builtin;
use crate::OperationHandler;

/// Maps operation names to shared handler implementations.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in handlers
    /// (`log`, `alert`, `transform`, `validate`, `fallback`, `split`, `merge`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) the handler for `operation`.
    pub fn register<H>(&mut self, operation: impl Into<String>, handler: H) -> &mut Self
    where
        H: OperationHandler + 'static,
    {
        self.handlers.insert(operation.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(operation).cloned()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.operations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHandler;
    use serde_json::json;

    #[test]
    fn register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("score", MockHandler::returning("score", json!({ "score": 7 })));

        assert!(registry.contains("score"));
        assert!(registry.get("score").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = HandlerRegistry::with_builtins();
        assert_eq!(
            registry.operations(),
            vec!["alert", "fallback", "log", "merge", "split", "transform", "validate"]
        );
    }
}
