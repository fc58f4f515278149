mod chat;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use console::style;

use crate::core::catalog::GoalCatalog;
use crate::core::config::{BackendConfig, RuntimeConfig};
use crate::core::conversation::{ConversationDeps, SnapshotStore};
use crate::core::llm::providers::OpenAiCompatBackend;
use crate::core::llm::trace::MessageTrace;
use crate::core::llm::{LlmBackend, LlmGateway};
use crate::core::mcp::McpSessionPool;
use crate::tools::builtin::{CreateInvoiceTool, LookupCustomerTool};
use crate::tools::ToolDispatcher;

fn print_help() {
    println!("\n {} - durable tool-using conversation engine\n", style("confab").green().bold());
    println!("   {}  start an interactive conversation", style("chat   [--goal <id>]").bold());
    println!("   {}  resume a persisted conversation", style("resume <conversation-id>").bold());
    println!("   {}  list available goals", style("goals").bold());
    println!("\n Common flags: --config <path>, --debug-confirm\n");
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CliArgs {
    pub command: Option<String>,
    pub goal: Option<String>,
    pub config: Option<PathBuf>,
    pub conversation_id: Option<String>,
    pub debug_confirm: bool,
}

pub(crate) fn parse_args(args: &[String]) -> CliArgs {
    let mut parsed = CliArgs::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--goal" | "-g" => {
                if i + 1 < args.len() {
                    parsed.goal = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--debug-confirm" => {
                parsed.debug_confirm = true;
                i += 1;
            }
            other => {
                if parsed.command.is_none() {
                    parsed.command = Some(other.to_string());
                } else if parsed.command.as_deref() == Some("resume")
                    && parsed.conversation_id.is_none()
                {
                    parsed.conversation_id = Some(other.to_string());
                }
                i += 1;
            }
        }
    }
    parsed
}

pub async fn run_main() -> Result<()> {
    crate::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let parsed = parse_args(&args);

    match parsed.command.as_deref() {
        Some("chat") => chat::run_chat(parsed).await,
        Some("resume") => chat::run_resume(parsed).await,
        Some("goals") => run_goals(parsed).await,
        _ => {
            print_help();
            Ok(())
        }
    }
}

async fn run_goals(args: CliArgs) -> Result<()> {
    let config = RuntimeConfig::load(args.config.as_deref()).await?;
    let catalog = GoalCatalog::load(&config.data_dir().join("goals")).await;
    println!("\n Available goals:");
    for id in catalog.ids() {
        let description = catalog.get(id).map(|g| g.description.as_str()).unwrap_or("");
        println!("   {}  {}", style(id).bold(), description);
    }
    println!();
    Ok(())
}

/// Wire the process-wide runtime from configuration: one gateway, one
/// session pool, one dispatcher, one snapshot store.
pub(crate) async fn build_deps(config: &RuntimeConfig) -> Result<ConversationDeps> {
    let primary = build_backend(
        config
            .llm
            .primary
            .as_ref()
            .ok_or_else(|| anyhow!("config must define [llm.primary]"))?,
    )?;
    let fallback = config
        .llm
        .fallback
        .as_ref()
        .map(build_backend)
        .transpose()?;

    let mut gateway = LlmGateway::new(
        primary,
        fallback,
        config.call_policy(),
        config.recovery_interval(),
    );
    if let Some(dir) = &config.trace.dir {
        gateway = gateway.with_trace(MessageTrace::new(dir.clone()));
    }

    let pool = Arc::new(McpSessionPool::new());
    let mut dispatcher =
        ToolDispatcher::new(pool.clone()).with_call_timeout(config.tool_call_timeout());
    dispatcher.register(Arc::new(LookupCustomerTool));
    dispatcher.register(Arc::new(CreateInvoiceTool));

    let store = SnapshotStore::new(config.data_dir().join("conversations"));

    Ok(ConversationDeps {
        gateway: Arc::new(gateway),
        dispatcher: Arc::new(dispatcher),
        pool,
        store: Some(Arc::new(store)),
    })
}

fn build_backend(config: &BackendConfig) -> Result<Arc<dyn LlmBackend>> {
    let api_key = config.resolve_api_key()?;
    Ok(Arc::new(OpenAiCompatBackend::new(
        config.id.clone(),
        config.base_url.clone(),
        config.model.clone(),
        api_key,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_chat_with_goal_and_config() {
        let parsed = parse_args(&args(&[
            "confab",
            "chat",
            "--goal",
            "billing",
            "--config",
            "confab.toml",
            "--debug-confirm",
        ]));
        assert_eq!(parsed.command.as_deref(), Some("chat"));
        assert_eq!(parsed.goal.as_deref(), Some("billing"));
        assert_eq!(parsed.config.as_deref(), Some(std::path::Path::new("confab.toml")));
        assert!(parsed.debug_confirm);
    }

    #[test]
    fn parses_resume_with_conversation_id() {
        let parsed = parse_args(&args(&["confab", "resume", "abc-123"]));
        assert_eq!(parsed.command.as_deref(), Some("resume"));
        assert_eq!(parsed.conversation_id.as_deref(), Some("abc-123"));
    }
}
