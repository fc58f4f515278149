pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::goal::{AgentGoal, McpServerDefinition};
use crate::core::mcp::McpSessionPool;

pub type JsonMap = serde_json::Map<String, Value>;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// The uniform result envelope every tool call produces. Dispatch never
/// raises; failures become `success=false` entries the transcript can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub content: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ToolOutcome {
    pub fn ok(tool: &str, content: JsonMap) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            content,
            error: None,
            error_type: None,
        }
    }

    pub fn failed(tool: &str, error_type: &str, error: impl std::fmt::Display) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            content: JsonMap::new(),
            error: Some(error.to_string()),
            error_type: Some(error_type.to_string()),
        }
    }
}

/// Any callable addressable by name: a string-keyed arg map in, a
/// string-keyed result map out. Async covers sync handlers too.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, args: &JsonMap) -> Result<JsonMap>;
}

/// How a tool name resolves for a given goal. Decided once per call.
enum Resolution<'a> {
    Local(&'a Arc<dyn ToolHandler>),
    Remote(&'a McpServerDefinition),
    Unknown,
}

/// Executes confirmed tool calls, local or remote.
///
/// Retries are not its business: the surrounding engine owns the
/// bounded-attempt policy, the dispatcher only distinguishes terminal
/// failure from success.
pub struct ToolDispatcher {
    local: HashMap<String, Arc<dyn ToolHandler>>,
    pool: Arc<McpSessionPool>,
    call_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(pool: Arc<McpSessionPool>) -> Self {
        Self {
            local: HashMap::new(),
            pool,
            call_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        info!("registering local tool [{}]", handler.name());
        self.local.insert(handler.name().to_string(), handler);
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    fn resolve<'a>(&'a self, name: &str, goal: &'a AgentGoal) -> Resolution<'a> {
        if let Some(handler) = self.local.get(name) {
            return Resolution::Local(handler);
        }
        match &goal.mcp_server {
            Some(def) => Resolution::Remote(def),
            None => Resolution::Unknown,
        }
    }

    /// Run one tool call to completion, returning the uniform envelope.
    pub async fn execute(&self, tool: &str, args: JsonMap, goal: &AgentGoal) -> ToolOutcome {
        let args = apply_tool_defaults(tool, args);

        match self.resolve(tool, goal) {
            Resolution::Local(handler) => {
                match timeout(self.call_timeout, handler.invoke(&args)).await {
                    Ok(Ok(content)) => ToolOutcome::ok(tool, content),
                    Ok(Err(e)) => {
                        warn!("local tool [{tool}] failed: {e}");
                        ToolOutcome::failed(tool, "execution_error", e)
                    }
                    Err(_) => ToolOutcome::failed(
                        tool,
                        "timeout",
                        format!("no result within {:?}", self.call_timeout),
                    ),
                }
            }
            Resolution::Remote(def) => self.execute_remote(tool, args, def).await,
            Resolution::Unknown => ToolOutcome::failed(
                tool,
                "unknown_tool",
                format!("[{tool}] is neither registered locally nor served by the goal's tool server"),
            ),
        }
    }

    async fn execute_remote(
        &self,
        tool: &str,
        args: JsonMap,
        def: &McpServerDefinition,
    ) -> ToolOutcome {
        let coerced = coerce_args(args);

        let session = match self.pool.get_session(def).await {
            Ok(session) => session,
            Err(e) => {
                warn!("tool server [{}] unavailable: {e}", def.name);
                return ToolOutcome::failed(tool, "transport_unavailable", e);
            }
        };

        match timeout(
            self.call_timeout,
            session.call_tool(tool, Value::Object(coerced)),
        )
        .await
        {
            Ok(Ok(result)) => ToolOutcome::ok(tool, value_to_map(result)),
            Ok(Err(e)) => {
                warn!("remote tool [{tool}] failed: {e}");
                ToolOutcome::failed(tool, "execution_error", e)
            }
            Err(_) => ToolOutcome::failed(
                tool,
                "timeout",
                format!("no result within {:?}", self.call_timeout),
            ),
        }
    }
}

fn value_to_map(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = JsonMap::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

/// Narrow per-tool defaults layered on the generic path. Not a general
/// mechanism: each entry exists because the planner habitually omits an
/// argument the tool can sensibly default.
fn apply_tool_defaults(tool: &str, mut args: JsonMap) -> JsonMap {
    if tool == "create_invoice" && !args.contains_key("due_in_days") {
        args.insert("due_in_days".to_string(), Value::from(30));
    }
    args
}

/// Planner argument values arrive stringly-typed more often than not.
/// Coerce the unambiguous cases before remote dispatch: digit-only strings
/// to ints, single-decimal-point numeric strings to floats, true/false to
/// bools. Anything else passes through unchanged.
pub fn coerce_args(args: JsonMap) -> JsonMap {
    args.into_iter()
        .map(|(name, value)| (name, coerce_value(value)))
        .collect()
}

fn coerce_value(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    if s.is_empty() {
        return value;
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = s.parse::<i64>() {
            return Value::from(n);
        }
        return value;
    }

    if s.matches('.').count() == 1 && s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        if let Ok(f) = s.parse::<f64>() {
            return Value::from(f);
        }
        return value;
    }

    if s.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }

    value
}
