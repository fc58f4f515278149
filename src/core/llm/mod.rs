pub mod gateway;
pub mod providers;
pub mod trace;

pub use gateway::LlmGateway;

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion backend. The gateway is the only caller; nothing else
/// in the engine talks to a backend directly.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Minimal liveness probe used when deciding to leave fallback mode.
    async fn health_check(&self) -> Result<()> {
        self.generate(&[ChatMessage::user("ping")]).await.map(|_| ())
    }
}

/// Retry budget for one gateway call: several bounded attempts with backoff
/// inside an overall deadline, so a flaky backend gets more than one shot
/// without stalling the conversation.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub attempts: u32,
    pub per_attempt_timeout: Duration,
    pub overall_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Parse retries for the strict-JSON contract, per route.
    pub contract_attempts: u32,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            per_attempt_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(120),
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            contract_attempts: 2,
        }
    }
}

fn backoff_delay(policy: &CallPolicy, attempt: u32) -> Duration {
    let base = policy.base_backoff.as_millis() as u64;
    let exp = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(policy.max_backoff.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
    Duration::from_millis(capped.saturating_add(jitter))
}

/// Drive one backend through the retry budget. Returns the last error once
/// the attempts or the overall deadline run out.
pub(crate) async fn generate_with_retry(
    backend: &dyn LlmBackend,
    messages: &[ChatMessage],
    policy: &CallPolicy,
) -> Result<String> {
    let attempt_loop = async {
        let mut last_err = anyhow!("no attempts were made");
        for attempt in 0..policy.attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(policy, attempt)).await;
            }
            match timeout(policy.per_attempt_timeout, backend.generate(messages)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => {
                    warn!(
                        "backend [{}] attempt {}/{} failed: {e}",
                        backend.id(),
                        attempt + 1,
                        policy.attempts
                    );
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        "backend [{}] attempt {}/{} timed out after {:?}",
                        backend.id(),
                        attempt + 1,
                        policy.attempts,
                        policy.per_attempt_timeout
                    );
                    last_err = anyhow!("attempt timed out after {:?}", policy.per_attempt_timeout);
                }
            }
        }
        Err(last_err)
    };

    match timeout(policy.overall_timeout, attempt_loop).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "call deadline exceeded after {:?}",
            policy.overall_timeout
        )),
    }
}
