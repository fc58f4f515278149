use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::AgentError;
use crate::core::goal::{AgentGoal, ToolDefinition};
use crate::core::history::{Actor, Message};
use crate::core::llm::{ChatMessage, LlmGateway};

/// What the planner wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NextAction {
    Question,
    Confirm,
    PickNewGoal,
    Done,
}

/// The planner's strict-JSON reply.
///
/// Wire shape: `{"response": str, "next": "question"|"confirm"|"pick-new-goal"
/// |"done", "tool": str|null, "args": {name: value|null}}`. A `confirm` is
/// only actionable once every argument the tool declares is non-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPlan {
    pub response: String,
    pub next: NextAction,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Option<Value>>,
}

impl AgentPlan {
    /// Parse a raw model reply, tolerating markdown fences and stray prose
    /// around the JSON object. Contract violations are errors so the gateway
    /// can retry or fail over.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned = sanitize_reply(raw);
        let plan: AgentPlan = serde_json::from_str(&cleaned)?;
        if plan.next == NextAction::Confirm && plan.tool.is_none() {
            bail!("plan says 'confirm' but names no tool");
        }
        Ok(plan)
    }

    /// Names of arguments still unresolved: declared arguments the plan left
    /// out or set to null, plus any extra null-valued entries it produced.
    pub fn missing_args(&self, definition: Option<&ToolDefinition>) -> Vec<String> {
        let mut missing = Vec::new();
        if let Some(def) = definition {
            for arg in &def.arguments {
                match self.args.get(&arg.name) {
                    Some(Some(_)) => {}
                    _ => missing.push(arg.name.clone()),
                }
            }
        }
        for (name, value) in &self.args {
            if value.is_none() && !missing.contains(name) {
                missing.push(name.clone());
            }
        }
        missing
    }

    /// A confirm-plan whose arguments are all resolved.
    pub fn is_actionable(&self, definition: Option<&ToolDefinition>) -> bool {
        self.next == NextAction::Confirm
            && self.tool.is_some()
            && self.missing_args(definition).is_empty()
    }

    /// The resolved argument map, dropping any nulls.
    pub fn resolved_args(&self) -> serde_json::Map<String, Value> {
        self.args
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect()
    }
}

/// Strip markdown fences and surrounding prose, keeping the outermost JSON
/// object. Models decorate replies despite the contract; the transcript is
/// not the place to fight about it.
pub fn sanitize_reply(raw: &str) -> String {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap();
    let inner = match fence.captures(raw) {
        Some(captures) => captures.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw,
    };
    match (inner.find('{'), inner.rfind('}')) {
        (Some(start), Some(end)) if start < end => inner[start..=end].to_string(),
        _ => inner.trim().to_string(),
    }
}

/// Render the transcript for inclusion in planner/validator context.
pub fn render_transcript(history: &[Message]) -> String {
    let mut out = String::new();
    for message in history {
        let label = match message.actor {
            Actor::User => "user",
            Actor::Agent => "agent",
            Actor::ToolResult => "tool_result",
            Actor::UserConfirmedToolRun => "user_confirmed_tool_run",
            Actor::ConversationSummary => "conversation_summary",
        };
        out.push_str(&format!("{label}: {}\n", message.content));
    }
    out
}

fn render_tool_catalog(goal: &AgentGoal) -> String {
    let mut out = String::new();
    for tool in &goal.tools {
        out.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        for arg in &tool.arguments {
            out.push_str(&format!(
                "    * {} ({}): {}\n",
                arg.name, arg.arg_type, arg.description
            ));
        }
    }
    if out.is_empty() {
        out.push_str("(no tools available)\n");
    }
    out
}

/// Decides the next step of a conversation through the LLM gateway.
pub struct Planner {
    gateway: Arc<LlmGateway>,
}

impl Planner {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    pub async fn plan(
        &self,
        goal: &AgentGoal,
        history: &[Message],
        directive: Option<&str>,
    ) -> Result<AgentPlan, AgentError> {
        let messages = self.build_messages(goal, history, directive);
        self.gateway
            .call_structured(&messages, |raw| AgentPlan::parse(raw))
            .await
    }

    fn build_messages(
        &self,
        goal: &AgentGoal,
        history: &[Message],
        directive: Option<&str>,
    ) -> Vec<ChatMessage> {
        let mut system = String::new();
        system.push_str(
            "You are the planning engine of a tool-using conversational agent.\n\
             Decide the single next step of the conversation and reply with ONE \
             JSON object, no markdown, no commentary:\n\
             {\"response\": str, \"next\": \"question\"|\"confirm\"|\"pick-new-goal\"|\"done\", \
             \"tool\": str|null, \"args\": {name: value|null}}\n\n\
             Rules:\n\
             1. Use \"confirm\" only when a tool should run; name it in \"tool\" and \
             fill \"args\" with every argument the tool declares, null for unknown values.\n\
             2. Use \"question\" to ask the user for information, with the question in \"response\".\n\
             3. Use \"pick-new-goal\" when the user asks for something this goal cannot do.\n\
             4. Use \"done\" when the goal is complete.\n\n",
        );
        system.push_str(&format!("GOAL: {}\n\nTOOLS:\n", goal.description));
        system.push_str(&render_tool_catalog(goal));
        if !goal.example_transcript.is_empty() {
            system.push_str(&format!(
                "\nEXAMPLE CONVERSATION:\n{}\n",
                goal.example_transcript
            ));
        }

        let mut messages = vec![ChatMessage::system(system)];
        for message in history {
            match message.actor {
                Actor::User => messages.push(ChatMessage::user(message.content.clone())),
                Actor::Agent => messages.push(ChatMessage::assistant(message.content.clone())),
                Actor::ToolResult => messages.push(ChatMessage::system(format!(
                    "TOOL RESULT: {}",
                    message.content
                ))),
                Actor::UserConfirmedToolRun => {
                    messages.push(ChatMessage::system(message.content.clone()))
                }
                Actor::ConversationSummary => messages.push(ChatMessage::system(format!(
                    "CONVERSATION SUMMARY: {}",
                    message.content
                ))),
            }
        }
        if let Some(directive) = directive {
            messages.push(ChatMessage::system(directive.to_string()));
        }
        messages
    }
}
