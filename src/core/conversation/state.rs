use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::goal::{AgentGoal, ToolDefinition};
use crate::core::history::{Message, PromptQueue, QueuedPrompt};
use crate::core::planner::{AgentPlan, NextAction};
use crate::tools::{JsonMap, ToolOutcome};

/// Where the per-conversation machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    AwaitingInput,
    Validating,
    Planning,
    AwaitingConfirmation,
    ExecutingTool,
    Done,
}

/// The complete serializable state of one conversation.
///
/// Everything the machine knows lives here; the async driver owns no state
/// of its own. A snapshot taken after any applied event is enough to resume
/// the conversation in a fresh process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    /// Runtime copy of the activated goal; its tool catalog may grow with
    /// remotely-discovered tools.
    pub goal: AgentGoal,
    /// Bumped on every compaction ("continue-as-new").
    pub generation: u32,
    pub phase: Phase,
    pub history: Vec<Message>,
    pub queue: PromptQueue,
    pub latest_plan: Option<AgentPlan>,
    pub confirm_requested: bool,
    pub debug_confirm: bool,
    pub ended: bool,
    pub last_summary: Option<String>,
    pub compaction_threshold: usize,
    /// Pending system-injected instruction for the planner; not part of the
    /// visible transcript.
    pub current_directive: Option<String>,
}

impl ConversationState {
    pub fn new(goal: AgentGoal, compaction_threshold: usize) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            goal,
            generation: 0,
            phase: Phase::AwaitingInput,
            history: Vec::new(),
            queue: PromptQueue::default(),
            latest_plan: None,
            confirm_requested: false,
            debug_confirm: false,
            ended: false,
            last_summary: None,
            compaction_threshold,
            current_directive: None,
        }
    }

    fn plan_tool_definition<'a>(&'a self, plan: &AgentPlan) -> Option<&'a ToolDefinition> {
        plan.tool.as_deref().and_then(|t| self.goal.tool(t))
    }

    fn outstanding_plan_actionable(&self) -> bool {
        self.phase == Phase::AwaitingConfirmation
            && self
                .latest_plan
                .as_ref()
                .is_some_and(|plan| plan.is_actionable(self.plan_tool_definition(plan)))
    }
}

/// Everything that can happen to a conversation: external signals and the
/// results of performed effects.
#[derive(Debug, Clone)]
pub enum Event {
    PromptSubmitted { text: String, system: bool },
    ConfirmRequested,
    DebugConfirmSet { enabled: bool },
    EndRequested,
    RemoteToolsDiscovered { tools: Vec<ToolDefinition> },
    BeginTurn,
    ValidationPassed,
    ValidationRejected { nudge: String },
    PlanReady { plan: AgentPlan },
    TurnFailed { error: String },
    ConfirmedRunStarted,
    ToolFinished { outcome: ToolOutcome },
    SummaryReady { summary: String },
}

/// External work requested by a transition. The driver performs these and
/// feeds the results back as events.
#[derive(Debug, Clone)]
pub enum Effect {
    Validate { prompt: String },
    Plan,
    RunTool { tool: String, args: JsonMap },
}

/// What the driver should do next, decided purely from state. Priority:
/// finishing beats a pending confirmed execution beats everything else, and
/// a confirmed execution is never overtaken by a newly queued prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Finish,
    ExecuteConfirmed,
    Compact,
    ProcessPrompt,
    Idle,
}

pub fn next_step(state: &ConversationState) -> Step {
    if state.ended || state.phase == Phase::Done {
        return Step::Finish;
    }
    if state.confirm_requested && state.outstanding_plan_actionable() {
        return Step::ExecuteConfirmed;
    }
    if state.phase == Phase::AwaitingInput && state.history.len() >= state.compaction_threshold {
        return Step::Compact;
    }
    if !state.queue.is_empty() {
        return Step::ProcessPrompt;
    }
    Step::Idle
}

/// The single transition function. Deterministic given (state, event) apart
/// from informational message timestamps; performs no I/O.
pub fn apply(state: &mut ConversationState, event: Event) -> Vec<Effect> {
    match event {
        Event::PromptSubmitted { text, system } => {
            if state.ended {
                warn!(
                    "conversation [{}] has ended, dropping prompt: {text}",
                    state.conversation_id
                );
                return Vec::new();
            }
            state.queue.push_back(QueuedPrompt { text, system });
            Vec::new()
        }

        Event::ConfirmRequested => {
            if state.outstanding_plan_actionable() {
                state.confirm_requested = true;
            } else {
                info!(
                    "conversation [{}]: confirm ignored, no outstanding resolved plan",
                    state.conversation_id
                );
            }
            Vec::new()
        }

        Event::DebugConfirmSet { enabled } => {
            state.debug_confirm = enabled;
            if enabled && state.outstanding_plan_actionable() {
                state.confirm_requested = true;
            }
            Vec::new()
        }

        Event::EndRequested => {
            state.ended = true;
            state.phase = Phase::Done;
            Vec::new()
        }

        Event::RemoteToolsDiscovered { tools } => {
            let added = state.goal.merge_remote_tools(tools);
            if added > 0 {
                info!(
                    "conversation [{}]: merged {added} remote tools into goal [{}]",
                    state.conversation_id, state.goal.id
                );
            }
            Vec::new()
        }

        Event::BeginTurn => {
            let Some(prompt) = state.queue.pop_front() else {
                return Vec::new();
            };
            if state.phase == Phase::AwaitingConfirmation {
                info!(
                    "conversation [{}]: outstanding plan abandoned by a new prompt",
                    state.conversation_id
                );
            }
            state.confirm_requested = false;
            if prompt.system {
                state.current_directive = Some(prompt.text);
                state.phase = Phase::Planning;
                vec![Effect::Plan]
            } else {
                state.history.push(Message::user(prompt.text.clone()));
                state.phase = Phase::Validating;
                vec![Effect::Validate {
                    prompt: prompt.text,
                }]
            }
        }

        Event::ValidationPassed => {
            state.phase = Phase::Planning;
            vec![Effect::Plan]
        }

        Event::ValidationRejected { nudge } => {
            state.history.push(Message::agent(nudge));
            state.phase = Phase::AwaitingInput;
            Vec::new()
        }

        Event::PlanReady { plan } => {
            state.current_directive = None;
            match plan.next {
                NextAction::Question | NextAction::PickNewGoal => {
                    state.history.push(Message::agent(plan.response.clone()));
                    state.phase = Phase::AwaitingInput;
                }
                NextAction::Done => {
                    state.history.push(Message::agent(plan.response.clone()));
                    state.phase = Phase::Done;
                    state.ended = true;
                }
                NextAction::Confirm => {
                    let definition = state.plan_tool_definition(&plan);
                    let missing = plan.missing_args(definition);
                    let tool = plan.tool.clone().unwrap_or_default();
                    if missing.is_empty() {
                        state.history.push(Message::agent(plan.response.clone()));
                        state.phase = Phase::AwaitingConfirmation;
                        if state.debug_confirm {
                            state.confirm_requested = true;
                        }
                    } else {
                        info!(
                            "conversation [{}]: plan for [{tool}] is missing {missing:?}",
                            state.conversation_id
                        );
                        state.queue.push_front(QueuedPrompt::system(format!(
                            "The plan to run [{tool}] is missing values for: {}. \
                             Ask the user for exactly these values.",
                            missing.join(", ")
                        )));
                        state.phase = Phase::AwaitingInput;
                    }
                }
            }
            state.latest_plan = Some(plan);
            Vec::new()
        }

        Event::TurnFailed { error } => {
            error!(
                "conversation [{}]: turn aborted: {error}",
                state.conversation_id
            );
            state.current_directive = None;
            state.history.push(Message::agent(format!(
                "I hit an internal problem and could not finish that step: {error}"
            )));
            state.phase = Phase::AwaitingInput;
            Vec::new()
        }

        Event::ConfirmedRunStarted => {
            state.confirm_requested = false;
            let Some((tool, args)) = state.latest_plan.as_ref().and_then(|plan| {
                plan.tool
                    .clone()
                    .map(|tool| (tool, plan.resolved_args()))
            }) else {
                state.phase = Phase::AwaitingInput;
                return Vec::new();
            };
            state.history.push(Message::confirmed_run(&tool));
            state.phase = Phase::ExecutingTool;
            vec![Effect::RunTool { tool, args }]
        }

        Event::ToolFinished { outcome } => {
            let follow_up = if outcome.success {
                format!(
                    "The tool [{}] completed successfully with result: {}. \
                     Share the outcome with the user and decide the next step.",
                    outcome.tool,
                    Value::Object(outcome.content.clone())
                )
            } else {
                format!(
                    "The tool [{}] failed: {}. Explain the failure to the user \
                     and decide how to proceed.",
                    outcome.tool,
                    outcome.error.as_deref().unwrap_or("unknown error")
                )
            };
            state.history.push(Message::tool_result(outcome));
            state.queue.push_front(QueuedPrompt::system(follow_up));
            state.phase = Phase::AwaitingInput;
            Vec::new()
        }

        Event::SummaryReady { summary } => {
            info!(
                "conversation [{}]: compacted generation {} into a summary",
                state.conversation_id, state.generation
            );
            state.generation += 1;
            state.history = vec![Message::summary(summary.clone())];
            state.last_summary = Some(summary);
            state.latest_plan = None;
            state.confirm_requested = false;
            state.phase = Phase::AwaitingInput;
            Vec::new()
        }
    }
}
