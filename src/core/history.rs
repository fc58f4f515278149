use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolOutcome;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User,
    Agent,
    ToolResult,
    UserConfirmedToolRun,
    ConversationSummary,
}

/// One entry in the append-only conversation transcript.
///
/// `content` is plain text for user/agent turns; tool results additionally
/// carry the structured outcome so tests and the planner do not have to
/// re-parse the rendered text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub actor: Actor,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ToolOutcome>,
    pub at: DateTime<Utc>,
}

impl Message {
    fn new(actor: Actor, content: impl Into<String>) -> Self {
        Self {
            actor,
            content: content.into(),
            outcome: None,
            at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Actor::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Actor::Agent, content)
    }

    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(Actor::ConversationSummary, content)
    }

    pub fn confirmed_run(tool: &str) -> Self {
        Self::new(
            Actor::UserConfirmedToolRun,
            format!("Confirmed execution of [{tool}]"),
        )
    }

    pub fn tool_result(outcome: ToolOutcome) -> Self {
        let rendered = serde_json::to_string(&outcome)
            .unwrap_or_else(|_| format!("tool [{}] result unrenderable", outcome.tool));
        let mut msg = Self::new(Actor::ToolResult, rendered);
        msg.outcome = Some(outcome);
        msg
    }
}

/// A queued input waiting for its turn. `system` entries are injected by the
/// engine itself (tool-completion and missing-argument follow-ups) and bypass
/// the validation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPrompt {
    pub text: String,
    pub system: bool,
}

impl QueuedPrompt {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            system: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            system: true,
        }
    }
}

/// FIFO of pending inputs. System follow-ups jump the line so a turn's
/// continuation is never overtaken by newly submitted prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptQueue(VecDeque<QueuedPrompt>);

impl PromptQueue {
    pub fn push_back(&mut self, prompt: QueuedPrompt) {
        self.0.push_back(prompt);
    }

    pub fn push_front(&mut self, prompt: QueuedPrompt) {
        self.0.push_front(prompt);
    }

    pub fn pop_front(&mut self) -> Option<QueuedPrompt> {
        self.0.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedPrompt> {
        self.0.iter()
    }
}
