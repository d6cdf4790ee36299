//! Tool dispatch
//!
//! A registry of async handlers keyed by tool name. The dispatcher
//! never raises toward the model session: unknown names, handler
//! failures, and timeouts all come back as well-formed `{error: ...}`
//! objects so the session keeps running.

pub mod builtin;
pub mod schemas;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ToolsConfig;
use crate::error::Result;

/// Call context handlers receive so side effects land on the right
/// call and tenant.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub call_id: Option<String>,
    pub business_id: Option<String>,
}

impl ToolContext {
    pub fn for_call(call_id: impl Into<String>, business_id: Option<String>) -> Self {
        Self {
            call_id: Some(call_id.into()),
            business_id,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value>;
}

pub struct ToolDispatcher {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    default_timeout: Duration,
    timeout_overrides: HashMap<String, Duration>,
}

impl ToolDispatcher {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            default_timeout: Duration::from_secs(config.timeout_secs),
            timeout_overrides: config
                .timeout_overrides
                .iter()
                .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
                .collect(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a tool and always produce a result object. The soft timeout
    /// is best-effort cancellation; the model gets `{error:
    /// "cancelled"}` so the session does not stall on a lost output.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> Value {
        let Some(handler) = self.handlers.get(name) else {
            warn!(tool = %name, "unknown tool requested");
            return json!({
                "error": format!("Unknown tool: {name}"),
                "available_tools": self.tool_names(),
            });
        };

        let timeout = self
            .timeout_overrides
            .get(name)
            .copied()
            .unwrap_or(self.default_timeout);

        info!(tool = %name, call_id = ?ctx.call_id, "tool call received");
        match tokio::time::timeout(timeout, handler.call(args, ctx)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                json!({ "error": e.to_string() })
            }
            Err(_) => {
                warn!(tool = %name, timeout_secs = timeout.as_secs(), "tool cancelled on timeout");
                json!({ "error": "cancelled" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(json!({ "echo": args }))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
            Err(BridgeError::ToolExecution("backend unavailable".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl ToolHandler for Slow {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut config = ToolsConfig::default();
        config.timeout_overrides.insert("slow".to_string(), 0);
        let mut dispatcher = ToolDispatcher::new(&config);
        dispatcher.register("echo", Arc::new(Echo));
        dispatcher.register("failing", Arc::new(Failing));
        dispatcher.register("slow", Arc::new(Slow));
        dispatcher
    }

    #[tokio::test]
    async fn test_dispatch_known_tool() {
        let result = dispatcher()
            .dispatch("echo", json!({"a": 1}), &ToolContext::default())
            .await;
        assert_eq!(result["echo"]["a"], 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available() {
        let result = dispatcher()
            .dispatch("nope", json!({}), &ToolContext::default())
            .await;
        assert!(result["error"].as_str().unwrap().contains("Unknown tool"));
        let available: Vec<&str> = result["available_tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(available.contains(&"echo"));
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let result = dispatcher()
            .dispatch("failing", json!({}), &ToolContext::default())
            .await;
        assert!(result["error"].as_str().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_timeout_reports_cancelled() {
        let result = dispatcher()
            .dispatch("slow", json!({}), &ToolContext::default())
            .await;
        assert_eq!(result["error"], "cancelled");
    }
}
