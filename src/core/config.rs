use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;

use crate::core::llm::CallPolicy;

/// Runtime configuration, loaded from a TOML file with sane defaults for
/// everything but backend credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    /// Where goal files and conversation snapshots live.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub primary: Option<BackendConfig>,
    pub fallback: Option<BackendConfig>,
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_per_attempt_timeout_secs")]
    pub per_attempt_timeout_secs: u64,
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: None,
            fallback: None,
            recovery_interval_secs: default_recovery_interval_secs(),
            attempts: default_attempts(),
            per_attempt_timeout_secs: default_per_attempt_timeout_secs(),
            overall_timeout_secs: default_overall_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; an inline `api_key` wins
    /// when both are present.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl BackendConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        let var = self
            .api_key_env
            .as_deref()
            .ok_or_else(|| anyhow!("backend [{}] has neither api_key nor api_key_env", self.id))?;
        std::env::var(var)
            .with_context(|| format!("backend [{}]: env var {var} is not set", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceConfig {
    /// Enables the LLM message dump when set.
    pub dir: Option<PathBuf>,
}

fn default_recovery_interval_secs() -> u64 {
    300
}

fn default_attempts() -> u32 {
    3
}

fn default_per_attempt_timeout_secs() -> u64 {
    30
}

fn default_overall_timeout_secs() -> u64 {
    120
}

fn default_compaction_threshold() -> usize {
    24
}

fn default_tool_timeout_secs() -> u64 {
    30 * 60
}

impl RuntimeConfig {
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config {path:?}"))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing config {path:?}"))?;
        info!("loaded configuration from {path:?}");
        Ok(config)
    }

    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            attempts: self.llm.attempts,
            per_attempt_timeout: Duration::from_secs(self.llm.per_attempt_timeout_secs),
            overall_timeout: Duration::from_secs(self.llm.overall_timeout_secs),
            ..CallPolicy::default()
        }
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.llm.recovery_interval_secs)
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tools.call_timeout_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".confab"))
    }
}
