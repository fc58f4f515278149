pub mod compaction;
pub mod state;
pub mod store;

pub use state::{ConversationState, Phase};
pub use store::SnapshotStore;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::goal::AgentGoal;
use crate::core::history::Message;
use crate::core::llm::LlmGateway;
use crate::core::mcp::McpSessionPool;
use crate::core::planner::{AgentPlan, Planner};
use crate::core::validation::{ValidationGate, Verdict};
use crate::tools::ToolDispatcher;
use state::{Effect, Event, Step, apply, next_step};

/// External signals injected into a running conversation.
#[derive(Debug, Clone)]
enum Signal {
    Prompt(String),
    Confirm,
    End,
    DebugConfirm(bool),
}

/// Shared collaborators every conversation uses. The gateway and the pool
/// are process-wide; one `ConversationDeps` is built at startup and cloned
/// per conversation.
#[derive(Clone)]
pub struct ConversationDeps {
    pub gateway: Arc<LlmGateway>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub pool: Arc<McpSessionPool>,
    pub store: Option<Arc<SnapshotStore>>,
}

/// Handle to one durable conversation actor.
///
/// Commands are signals delivered in receipt order to the driver task;
/// queries read a consistent state snapshot and never suspend the machine.
pub struct Conversation {
    signals: mpsc::Sender<Signal>,
    state: Arc<RwLock<ConversationState>>,
    task: JoinHandle<()>,
}

impl Conversation {
    /// Start a fresh conversation for a goal.
    pub fn start(goal: AgentGoal, deps: ConversationDeps, compaction_threshold: usize) -> Self {
        Self::launch(ConversationState::new(goal, compaction_threshold), deps)
    }

    /// Resume from a persisted snapshot; the driver picks up exactly where
    /// the last applied event left the state.
    pub fn resume(state: ConversationState, deps: ConversationDeps) -> Self {
        info!(
            "resuming conversation [{}] at generation {}",
            state.conversation_id, state.generation
        );
        Self::launch(state, deps)
    }

    fn launch(state: ConversationState, deps: ConversationDeps) -> Self {
        let (signals, signal_rx) = mpsc::channel(64);
        let shared = Arc::new(RwLock::new(state));
        let driver = Driver {
            state: shared.clone(),
            signals: signal_rx,
            planner: Planner::new(deps.gateway.clone()),
            validator: ValidationGate::new(deps.gateway.clone()),
            gateway: deps.gateway,
            dispatcher: deps.dispatcher,
            pool: deps.pool,
            store: deps.store,
        };
        let task = tokio::spawn(driver.run());
        Self {
            signals,
            state: shared,
            task,
        }
    }

    pub async fn submit_prompt(&self, text: impl Into<String>) {
        self.send(Signal::Prompt(text.into())).await;
    }

    pub async fn confirm(&self) {
        self.send(Signal::Confirm).await;
    }

    pub async fn end_chat(&self) {
        self.send(Signal::End).await;
    }

    pub async fn set_debug_confirm(&self, enabled: bool) {
        self.send(Signal::DebugConfirm(enabled)).await;
    }

    async fn send(&self, signal: Signal) {
        if self.signals.send(signal).await.is_err() {
            warn!("conversation driver is gone, signal dropped");
        }
    }

    pub async fn history(&self) -> Vec<Message> {
        self.state.read().await.history.clone()
    }

    pub async fn goal(&self) -> AgentGoal {
        self.state.read().await.goal.clone()
    }

    pub async fn latest_plan(&self) -> Option<AgentPlan> {
        self.state.read().await.latest_plan.clone()
    }

    pub async fn summary(&self) -> Option<String> {
        self.state.read().await.last_summary.clone()
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase
    }

    pub async fn conversation_id(&self) -> String {
        self.state.read().await.conversation_id.clone()
    }

    /// Wait until the machine has nothing in flight: queue drained and the
    /// phase parked on input, confirmation, or done.
    pub async fn settled(&self) -> Phase {
        loop {
            {
                let state = self.state.read().await;
                let parked = matches!(
                    state.phase,
                    Phase::AwaitingInput | Phase::AwaitingConfirmation | Phase::Done
                );
                if parked && state.queue.is_empty() && !state.confirm_requested {
                    return state.phase;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait for the driver to finish (after `end_chat` or a `done` plan).
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

struct Driver {
    state: Arc<RwLock<ConversationState>>,
    signals: mpsc::Receiver<Signal>,
    planner: Planner,
    validator: ValidationGate,
    gateway: Arc<LlmGateway>,
    dispatcher: Arc<ToolDispatcher>,
    pool: Arc<McpSessionPool>,
    store: Option<Arc<SnapshotStore>>,
}

impl Driver {
    async fn run(mut self) {
        self.activate_goal().await;

        loop {
            // Apply any buffered signals in receipt order before deciding.
            while let Ok(signal) = self.signals.try_recv() {
                self.handle_signal(signal).await;
            }

            let step = next_step(&*self.state.read().await);
            match step {
                Step::Finish => {
                    self.persist().await;
                    let id = self.state.read().await.conversation_id.clone();
                    info!("conversation [{id}] finished");
                    break;
                }
                Step::ExecuteConfirmed => {
                    let effects = self.apply(Event::ConfirmedRunStarted).await;
                    self.perform(effects).await;
                }
                Step::ProcessPrompt => {
                    let effects = self.apply(Event::BeginTurn).await;
                    self.perform(effects).await;
                }
                Step::Compact => self.compact().await,
                Step::Idle => match self.signals.recv().await {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        info!("all conversation handles dropped, stopping driver");
                        break;
                    }
                },
            }
        }
    }

    /// One-time goal activation: discover and merge remote tools when the
    /// goal binds an external server. Failures leave the goal usable with
    /// its local tools.
    async fn activate_goal(&self) {
        let server = self.state.read().await.goal.mcp_server.clone();
        let Some(def) = server else {
            self.persist().await;
            return;
        };
        match self.pool.list_remote_tools(&def).await {
            Ok(tools) => {
                self.apply(Event::RemoteToolsDiscovered { tools }).await;
            }
            Err(e) => {
                warn!(
                    "proceeding without remote tools from [{}]: {e}",
                    def.name
                );
                self.persist().await;
            }
        }
    }

    async fn handle_signal(&self, signal: Signal) {
        let event = match signal {
            Signal::Prompt(text) => Event::PromptSubmitted {
                text,
                system: false,
            },
            Signal::Confirm => Event::ConfirmRequested,
            Signal::End => Event::EndRequested,
            Signal::DebugConfirm(enabled) => Event::DebugConfirmSet { enabled },
        };
        self.apply(event).await;
    }

    /// Run the pure transition, then persist the snapshot.
    async fn apply(&self, event: Event) -> Vec<Effect> {
        let effects = {
            let mut state = self.state.write().await;
            apply(&mut state, event)
        };
        self.persist().await;
        effects
    }

    /// Perform effects until the chain is exhausted. Each effect's result is
    /// fed back through the transition, which may request follow-up work.
    async fn perform(&self, effects: Vec<Effect>) {
        let mut work: VecDeque<Effect> = effects.into();
        while let Some(effect) = work.pop_front() {
            let next = match effect {
                Effect::Validate { prompt } => {
                    let (goal, history) = {
                        let state = self.state.read().await;
                        (state.goal.clone(), state.history.clone())
                    };
                    match self.validator.validate(&prompt, &history, &goal).await {
                        Ok(Verdict::Ok) => self.apply(Event::ValidationPassed).await,
                        Ok(Verdict::Rejected { nudge }) => {
                            self.apply(Event::ValidationRejected { nudge }).await
                        }
                        Err(e) => {
                            self.apply(Event::TurnFailed {
                                error: e.to_string(),
                            })
                            .await
                        }
                    }
                }
                Effect::Plan => {
                    let (goal, history, directive) = {
                        let state = self.state.read().await;
                        (
                            state.goal.clone(),
                            state.history.clone(),
                            state.current_directive.clone(),
                        )
                    };
                    match self
                        .planner
                        .plan(&goal, &history, directive.as_deref())
                        .await
                    {
                        Ok(plan) => self.apply(Event::PlanReady { plan }).await,
                        Err(e) => {
                            self.apply(Event::TurnFailed {
                                error: e.to_string(),
                            })
                            .await
                        }
                    }
                }
                Effect::RunTool { tool, args } => {
                    let goal = self.state.read().await.goal.clone();
                    let outcome = self.dispatcher.execute(&tool, args, &goal).await;
                    self.apply(Event::ToolFinished { outcome }).await
                }
            };
            for effect in next.into_iter().rev() {
                work.push_front(effect);
            }
        }
    }

    async fn compact(&self) {
        let (goal, history) = {
            let state = self.state.read().await;
            (state.goal.clone(), state.history.clone())
        };
        let summary = match compaction::summarize(&self.gateway, &goal, &history).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("summary call failed, compacting with a fallback: {e}");
                compaction::fallback_summary(&goal, &history)
            }
        };
        self.apply(Event::SummaryReady { summary }).await;
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = self.state.read().await.clone();
        if let Err(e) = store.save(&snapshot).await {
            warn!("snapshot save failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests;
