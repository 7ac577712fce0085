//! The agent's tool registry.
//!
//! Structured tool calls from the LLM suspend synthesis for their segment,
//! dispatch here, and append the result to conversation history as a `tool`
//! message before generation resumes.

use std::collections::HashMap;
use std::sync::Arc;

use vx_domain::error::{Error, Result};
use vx_domain::tool::ToolDefinition;

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;

    fn definition(&self) -> ToolDefinition;
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.definition().name, handler);
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.handlers.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one tool call. Unknown tools and handler failures come back
    /// as `Ok`-wrapped error strings so the conversation can continue; the
    /// model sees the failure and recovers.
    pub async fn dispatch(&self, tool_name: &str, arguments: serde_json::Value) -> String {
        let result = match self.handlers.get(tool_name) {
            Some(handler) => handler.invoke(arguments).await,
            None => Err(Error::NotFound(format!("tool: {tool_name}"))),
        };
        match result {
            Ok(value) => match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            },
            Err(e) => {
                tracing::warn!(tool_name, error = %e, "tool dispatch failed");
                format!("error: {e}")
            }
        }
    }
}
