use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::core::error::AgentError;
use crate::core::goal::AgentGoal;
use crate::core::history::Message;
use crate::core::llm::{ChatMessage, LlmGateway};
use crate::core::planner::{render_transcript, sanitize_reply};

/// Outcome of the topical-coherence check that gates every user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// The nudge is surfaced verbatim as the agent reply; the planner is not
    /// consulted that turn.
    Rejected { nudge: String },
}

#[derive(Deserialize)]
struct ValidationReply {
    ok: bool,
    #[serde(default)]
    response: String,
}

/// LLM-driven validation gate. System-injected prompts never pass through
/// here; the orchestrator calls it for user input only.
pub struct ValidationGate {
    gateway: Arc<LlmGateway>,
}

impl ValidationGate {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn validate(
        &self,
        prompt: &str,
        history: &[Message],
        goal: &AgentGoal,
    ) -> Result<Verdict, AgentError> {
        let messages = self.build_messages(prompt, history, goal);
        let reply = self
            .gateway
            .call_structured(&messages, |raw| {
                let cleaned = sanitize_reply(raw);
                let parsed: ValidationReply = serde_json::from_str(&cleaned)?;
                Ok(parsed)
            })
            .await?;

        if reply.ok {
            Ok(Verdict::Ok)
        } else {
            let nudge = if reply.response.is_empty() {
                "Let's stay on topic - how can I help with the current goal?".to_string()
            } else {
                reply.response
            };
            Ok(Verdict::Rejected { nudge })
        }
    }

    fn build_messages(
        &self,
        prompt: &str,
        history: &[Message],
        goal: &AgentGoal,
    ) -> Vec<ChatMessage> {
        let tool_names = goal
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let system = format!(
            "You judge whether a user message is coherent with an ongoing \
             conversation. Reply with ONE JSON object, no markdown:\n\
             {{\"ok\": true|false, \"response\": str}}\n\n\
             Accept anything plausibly related to the goal or to the agent's \
             last turn. Short acknowledgements like \"yes\", \"ok\" or \"go \
             ahead\" answer the immediately preceding agent message and are \
             coherent. When rejecting, put a short redirecting nudge in \
             \"response\".\n\n\
             GOAL: {}\nTOOLS: {}\n\nCONVERSATION SO FAR:\n{}",
            goal.description,
            tool_names,
            render_transcript(history),
        );

        vec![
            ChatMessage::system(system),
            ChatMessage::user(format!("Candidate user message: {prompt}")),
        ]
    }
}
