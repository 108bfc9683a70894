use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use butler_schemas::{ErrorKind, ToolError};
use serde_json::Value;

/// The one tool name every butler must understand without module registration.
pub const ROUTE_EXECUTE_TOOL: &str = "route.execute";

/// A callable unit of RPC surface: `(args_map) -> result_map`.
///
/// Implementors must not panic on malformed input; validation failures are
/// reported as `ErrorKind::ValidationError` through the returned `ToolError`,
/// never as a Rust panic crossing the tool boundary.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registers named tools for one butler and dispatches calls by name.
///
/// Registration order is insertion order; a later `register` with the same
/// name replaces the earlier one (used by module reload during development,
/// never expected in a single startup pass).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(|s| s.as_str())
    }

    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        match self.tools.get(name) {
            Some(tool) => tool.call(args).await,
            None => Err(ToolError::new(
                ErrorKind::NotFound,
                format!("no tool registered under name '{name}'"),
            )),
        }
    }
}
