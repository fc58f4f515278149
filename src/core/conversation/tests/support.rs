use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::conversation::{Conversation, ConversationDeps, SnapshotStore};
use crate::core::goal::{AgentGoal, ToolArgument, ToolDefinition};
use crate::core::llm::{CallPolicy, ChatMessage, LlmBackend, LlmGateway};
use crate::core::mcp::McpSessionPool;
use crate::tools::{JsonMap, ToolDispatcher, ToolHandler};

/// Backend that replays a fixed script of replies, one per generate call.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        })
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }
}

struct RecordNoteTool;

#[async_trait]
impl ToolHandler for RecordNoteTool {
    fn name(&self) -> &str {
        "record_note"
    }

    async fn invoke(&self, args: &JsonMap) -> Result<JsonMap> {
        let mut out = JsonMap::new();
        out.insert(
            "noted".to_string(),
            args.get("text").cloned().unwrap_or_default(),
        );
        Ok(out)
    }
}

struct AlwaysFailsTool;

#[async_trait]
impl ToolHandler for AlwaysFailsTool {
    fn name(&self) -> &str {
        "always_fails"
    }

    async fn invoke(&self, _args: &JsonMap) -> Result<JsonMap> {
        Err(anyhow!("synthetic failure"))
    }
}

pub fn test_goal() -> AgentGoal {
    AgentGoal {
        id: "support".to_string(),
        description: "Record support notes for the user".to_string(),
        tools: vec![
            ToolDefinition {
                name: "record_note".to_string(),
                description: "Store a note".to_string(),
                arguments: vec![ToolArgument {
                    name: "text".to_string(),
                    arg_type: "string".to_string(),
                    description: "Note body".to_string(),
                }],
            },
            ToolDefinition {
                name: "always_fails".to_string(),
                description: "A tool that never works".to_string(),
                arguments: Vec::new(),
            },
        ],
        ..Default::default()
    }
}

fn quick_policy() -> CallPolicy {
    CallPolicy {
        attempts: 1,
        per_attempt_timeout: Duration::from_secs(5),
        overall_timeout: Duration::from_secs(10),
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        contract_attempts: 1,
    }
}

pub fn scripted_deps(replies: &[&str]) -> ConversationDeps {
    scripted_deps_with_store(replies, None)
}

pub fn scripted_deps_with_store(
    replies: &[&str],
    store: Option<Arc<SnapshotStore>>,
) -> ConversationDeps {
    let gateway = Arc::new(LlmGateway::new(
        ScriptedLlm::new(replies),
        None,
        quick_policy(),
        Duration::from_secs(300),
    ));
    let pool = Arc::new(McpSessionPool::new());
    let mut dispatcher = ToolDispatcher::new(pool.clone());
    dispatcher.register(Arc::new(RecordNoteTool));
    dispatcher.register(Arc::new(AlwaysFailsTool));
    ConversationDeps {
        gateway,
        dispatcher: Arc::new(dispatcher),
        pool,
        store,
    }
}

// Canned LLM replies.
pub const VALIDATE_OK: &str = r#"{"ok": true, "response": ""}"#;
pub const PLAN_QUESTION: &str =
    r#"{"response": "What do you need?", "next": "question", "tool": null, "args": {}}"#;
pub const PLAN_NOTE_CONFIRM: &str = r#"{"response": "Record the note 'hello'?", "next": "confirm", "tool": "record_note", "args": {"text": "hello"}}"#;
pub const PLAN_NOTE_MISSING: &str = r#"{"response": "I can record that.", "next": "confirm", "tool": "record_note", "args": {"text": null}}"#;
pub const PLAN_FAIL_CONFIRM: &str = r#"{"response": "Run the flaky tool?", "next": "confirm", "tool": "always_fails", "args": {}}"#;
pub const PLAN_DONE: &str =
    r#"{"response": "All wrapped up.", "next": "done", "tool": null, "args": {}}"#;

/// Poll the private state until `cond` holds; panics after five seconds.
pub async fn wait_until<F>(conversation: &Conversation, mut cond: F)
where
    F: FnMut(&crate::core::conversation::ConversationState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cond(&*conversation.state.read().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("conversation did not reach the expected state in time");
}
