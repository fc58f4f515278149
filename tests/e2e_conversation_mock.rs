//! End-to-end conversation flows against the public library surface, with a
//! scripted backend standing in for the LLM.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;

use confab::core::catalog::GoalCatalog;
use confab::core::conversation::{Conversation, ConversationDeps, Phase};
use confab::core::history::{Actor, Message};
use confab::core::llm::{CallPolicy, ChatMessage, LlmBackend, LlmGateway};
use confab::core::mcp::McpSessionPool;
use confab::tools::builtin::{CreateInvoiceTool, LookupCustomerTool};
use confab::tools::ToolDispatcher;

struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
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

fn deps(replies: &[&str]) -> ConversationDeps {
    let backend = Arc::new(ScriptedLlm {
        replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
    });
    let policy = CallPolicy {
        attempts: 1,
        contract_attempts: 1,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        ..CallPolicy::default()
    };
    let gateway = Arc::new(LlmGateway::new(backend, None, policy, Duration::from_secs(300)));

    let pool = Arc::new(McpSessionPool::new());
    let mut dispatcher = ToolDispatcher::new(pool.clone());
    dispatcher.register(Arc::new(LookupCustomerTool));
    dispatcher.register(Arc::new(CreateInvoiceTool));

    ConversationDeps {
        gateway,
        dispatcher: Arc::new(dispatcher),
        pool,
        store: None,
    }
}

const VALIDATE_OK: &str = r#"{"ok": true, "response": ""}"#;

async fn wait_for<F>(conversation: &Conversation, cond: F)
where
    F: Fn(&[Message], Phase) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let history = conversation.history().await;
            let phase = conversation.phase().await;
            if cond(&history, phase) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("conversation did not reach the expected state in time");
}

#[tokio::test]
async fn invoice_flow_applies_the_due_period_default() {
    let deps = deps(&[
        VALIDATE_OK,
        r#"{"response": "Create a 250.00 invoice for Acme Corp?", "next": "confirm",
            "tool": "create_invoice", "args": {"customer_id": "c-1001", "amount": 250.0}}"#,
        r#"{"response": "Invoice raised!", "next": "question", "tool": null, "args": {}}"#,
    ]);
    let goal = GoalCatalog::builtin().get("billing").unwrap().clone();
    let conversation = Conversation::start(goal, deps, 24);

    conversation.submit_prompt("invoice Acme for 250").await;
    wait_for(&conversation, |_, phase| phase == Phase::AwaitingConfirmation).await;

    conversation.confirm().await;
    wait_for(&conversation, |history, phase| {
        phase == Phase::AwaitingInput && history.len() == 5
    })
    .await;

    let history = conversation.history().await;
    let result = history
        .iter()
        .find(|m| m.actor == Actor::ToolResult)
        .and_then(|m| m.outcome.as_ref())
        .expect("tool result missing from transcript");
    assert!(result.success);
    assert_eq!(result.content["status"], serde_json::json!("draft"));
    // The planner never supplied payment terms; the dispatcher default did.
    assert_eq!(result.content["due_in_days"], serde_json::json!(30));
    assert_eq!(history.last().unwrap().content, "Invoice raised!");
}

#[tokio::test]
async fn unresolved_plan_ignores_confirm_and_asks_for_the_gap() {
    let deps = deps(&[
        VALIDATE_OK,
        r#"{"response": "I can do that.", "next": "confirm",
            "tool": "create_invoice", "args": {"customer_id": "c-1001", "amount": null}}"#,
        r#"{"response": "What amount should the invoice be for?", "next": "question",
            "tool": null, "args": {}}"#,
    ]);
    let goal = GoalCatalog::builtin().get("billing").unwrap().clone();
    let conversation = Conversation::start(goal, deps, 24);

    conversation.submit_prompt("invoice Acme").await;
    wait_for(&conversation, |history, phase| {
        phase == Phase::AwaitingInput && history.len() == 2
    })
    .await;

    conversation.confirm().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let history = conversation.history().await;
    assert!(history.iter().all(|m| m.actor != Actor::ToolResult));
    assert_eq!(
        history.last().unwrap().content,
        "What amount should the invoice be for?"
    );
}

#[tokio::test]
async fn ended_conversations_drop_new_prompts() {
    let deps = deps(&[]);
    let goal = GoalCatalog::builtin().get("billing").unwrap().clone();
    let conversation = Conversation::start(goal, deps, 24);

    conversation.end_chat().await;
    conversation.submit_prompt("anyone home?").await;

    wait_for(&conversation, |_, phase| phase == Phase::Done).await;
    assert!(conversation.history().await.is_empty());
    conversation.join().await;
}
