//! Tool registry and dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ToolError;
use crate::tools::tool::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools, keyed by name.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ToolDefinition>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. A later registration with the same name wins.
    pub async fn register(&self, definition: ToolDefinition) {
        let name = definition.name.clone();
        let replaced = self
            .tools
            .write()
            .await
            .insert(name.clone(), Arc::new(definition))
            .is_some();
        tracing::debug!(tool = %name, replaced, "Registered tool");
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.write().await.remove(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// Tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Run a tool with the handler for `ctx.channel`.
    ///
    /// Only an unknown name is an error. Handler failures and panics come
    /// back as an unsuccessful [`ToolResult`].
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let definition = self.get(name).await.ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;
        let handler = definition.handler_for(ctx.channel);

        let outcome = AssertUnwindSafe(handler.call(params, ctx)).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(output)) => ToolResult::ok(output),
            Ok(Err(e)) => {
                tracing::warn!(
                    tool = %name,
                    conversation_id = %ctx.conversation_id,
                    error = %e,
                    "Tool failed"
                );
                ToolResult::failure(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    tool = %name,
                    conversation_id = %ctx.conversation_id,
                    panic = %message,
                    "Tool panicked"
                );
                ToolResult::failure(format!("tool {name} panicked: {message}"))
            }
        };
        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
