use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::error::AgentError;
use crate::core::llm::trace::MessageTrace;
use crate::core::llm::{CallPolicy, ChatMessage, LlmBackend, generate_with_retry};

/// Which backend the supervisor is currently serving from.
#[derive(Debug, Clone, Copy, Default)]
struct RouteState {
    using_fallback: bool,
    /// Set at the moment the primary was declared down. Recovery probes are
    /// anchored to this instant; a failed probe does NOT reset it.
    primary_failed_at: Option<Instant>,
}

/// Read-only view of the failover state, for diagnostics and tests.
#[derive(Debug, Clone, Copy)]
pub struct FailoverSnapshot {
    pub using_fallback: bool,
    pub primary_failed_at: Option<Instant>,
}

/// The single choke point for all LLM calls in the process.
///
/// One gateway instance is constructed at startup and injected into every
/// conversation; its primary/fallback route state is shared by all of them
/// and outlives any single conversation.
pub struct LlmGateway {
    primary: Arc<dyn LlmBackend>,
    fallback: Option<Arc<dyn LlmBackend>>,
    policy: CallPolicy,
    recovery_interval: Duration,
    route: Mutex<RouteState>,
    trace: Option<MessageTrace>,
}

impl LlmGateway {
    pub fn new(
        primary: Arc<dyn LlmBackend>,
        fallback: Option<Arc<dyn LlmBackend>>,
        policy: CallPolicy,
        recovery_interval: Duration,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
            recovery_interval,
            route: Mutex::new(RouteState::default()),
            trace: None,
        }
    }

    /// Enable the fire-and-forget diagnostic dump of outbound messages.
    pub fn with_trace(mut self, trace: MessageTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub async fn snapshot(&self) -> FailoverSnapshot {
        let route = self.route.lock().await;
        FailoverSnapshot {
            using_fallback: route.using_fallback,
            primary_failed_at: route.primary_failed_at,
        }
    }

    /// Route one chat call through exactly one of {primary, fallback}.
    pub async fn call(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        if self.serving_fallback().await {
            return self.call_fallback(messages).await;
        }

        if let Some(trace) = &self.trace {
            trace.record(self.primary.id(), messages);
        }

        match generate_with_retry(self.primary.as_ref(), messages, &self.policy).await {
            Ok(text) => Ok(text),
            Err(e) => {
                if self.fallback.is_none() {
                    return Err(AgentError::Backend {
                        backend: self.primary.id().to_string(),
                        attempts: self.policy.attempts,
                        cause: e,
                    });
                }
                warn!(
                    "primary backend [{}] exhausted its retry budget, switching to fallback: {e}",
                    self.primary.id()
                );
                self.mark_primary_failed().await;
                self.call_fallback(messages).await
            }
        }
    }

    /// Strict-contract variant: bounded parse retries on the current route,
    /// then a forced switch and the same budget on the other one. Contract
    /// exhaustion on the last available route aborts the turn.
    pub async fn call_structured<T, F>(
        &self,
        messages: &[ChatMessage],
        parse: F,
    ) -> Result<T, AgentError>
    where
        F: Fn(&str) -> anyhow::Result<T>,
    {
        loop {
            for attempt in 0..self.policy.contract_attempts {
                let raw = self.call(messages).await?;
                match parse(&raw) {
                    Ok(value) => return Ok(value),
                    Err(e) => warn!(
                        "non-conforming reply (attempt {}/{}): {e}",
                        attempt + 1,
                        self.policy.contract_attempts
                    ),
                }
            }
            if !self.force_failover().await {
                return Err(AgentError::Contract {
                    backend: self.serving_backend_id().await,
                    attempts: self.policy.contract_attempts,
                });
            }
            info!("retrying contract call on the fallback backend");
        }
    }

    async fn serving_backend_id(&self) -> String {
        let route = self.route.lock().await;
        if route.using_fallback {
            self.fallback
                .as_ref()
                .map(|b| b.id().to_string())
                .unwrap_or_else(|| self.primary.id().to_string())
        } else {
            self.primary.id().to_string()
        }
    }

    /// Decide whether this call is served from fallback, probing the primary
    /// once the recovery interval since the *original* failure has elapsed.
    async fn serving_fallback(&self) -> bool {
        let failed_at = {
            let route = self.route.lock().await;
            if !route.using_fallback {
                return false;
            }
            route.primary_failed_at
        };

        let Some(failed_at) = failed_at else {
            // using_fallback implies a recorded failure; treat a missing one
            // as immediately due for a recheck.
            return !self.try_recover().await;
        };

        if failed_at.elapsed() < self.recovery_interval {
            return true;
        }
        !self.try_recover().await
    }

    /// Health-check the primary. On success the route flips back and the
    /// failure timestamp is cleared; on failure the timestamp is left
    /// untouched so the next recheck stays anchored to the original outage.
    async fn try_recover(&self) -> bool {
        match self.primary.health_check().await {
            Ok(()) => {
                let mut route = self.route.lock().await;
                route.using_fallback = false;
                route.primary_failed_at = None;
                info!(
                    "primary backend [{}] recovered, leaving fallback mode",
                    self.primary.id()
                );
                true
            }
            Err(e) => {
                warn!(
                    "primary backend [{}] still unhealthy: {e}",
                    self.primary.id()
                );
                false
            }
        }
    }

    async fn mark_primary_failed(&self) {
        let mut route = self.route.lock().await;
        route.using_fallback = true;
        route.primary_failed_at = Some(Instant::now());
    }

    /// Switch to fallback without a backend error (contract exhaustion).
    /// Returns false when there is nothing to switch to.
    async fn force_failover(&self) -> bool {
        if self.fallback.is_none() {
            return false;
        }
        let mut route = self.route.lock().await;
        if route.using_fallback {
            return false;
        }
        route.using_fallback = true;
        route.primary_failed_at = Some(Instant::now());
        warn!(
            "primary backend [{}] declared down after contract exhaustion",
            self.primary.id()
        );
        true
    }

    async fn call_fallback(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let fallback = self
            .fallback
            .as_ref()
            .expect("call_fallback requires a configured fallback");

        if let Some(trace) = &self.trace {
            trace.record(fallback.id(), messages);
        }

        match generate_with_retry(fallback.as_ref(), messages, &self.policy).await {
            Ok(text) => Ok(text),
            Err(e) => {
                error!(
                    "fallback backend [{}] failed with primary [{}] already down",
                    fallback.id(),
                    self.primary.id()
                );
                Err(AgentError::BackendsExhausted {
                    primary: self.primary.id().to_string(),
                    fallback: fallback.id().to_string(),
                    cause: e,
                })
            }
        }
    }
}
