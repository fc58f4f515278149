use std::sync::Arc;

use crate::core::error::AgentError;
use crate::core::goal::AgentGoal;
use crate::core::history::{Actor, Message};
use crate::core::llm::{ChatMessage, LlmGateway};
use crate::core::planner::render_transcript;

/// Ask the gateway for the two-sentence summary that seeds the next
/// generation.
pub async fn summarize(
    gateway: &Arc<LlmGateway>,
    goal: &AgentGoal,
    history: &[Message],
) -> Result<String, AgentError> {
    let system = format!(
        "Summarize the following conversation in exactly two sentences, \
         keeping every fact a future turn could need (names, ids, amounts, \
         pending requests). The conversation serves this goal: {}",
        goal.description
    );
    let messages = vec![
        ChatMessage::system(system),
        ChatMessage::user(render_transcript(history)),
    ];
    let summary = gateway.call(&messages).await?;
    Ok(summary.trim().to_string())
}

/// Degraded summary used when the gateway cannot produce one; compaction
/// must still make forward progress.
pub fn fallback_summary(goal: &AgentGoal, history: &[Message]) -> String {
    let last_user = history
        .iter()
        .rev()
        .find(|m| m.actor == Actor::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(none)");
    format!(
        "Conversation in progress about: {}. Earlier turns were truncated; \
         the user's last message was: {last_user}",
        goal.description
    )
}
