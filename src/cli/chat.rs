use std::io::Write;

use anyhow::{Result, anyhow};
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::CliArgs;
use crate::core::catalog::GoalCatalog;
use crate::core::config::RuntimeConfig;
use crate::core::conversation::{Conversation, Phase};
use crate::core::history::{Actor, Message};

pub(crate) async fn run_chat(args: CliArgs) -> Result<()> {
    let config = RuntimeConfig::load(args.config.as_deref()).await?;
    let catalog = GoalCatalog::load(&config.data_dir().join("goals")).await;

    let goal = match &args.goal {
        Some(id) => catalog
            .get(id)
            .ok_or_else(|| anyhow!("unknown goal '{id}' (try: confab goals)"))?,
        None => catalog.first().ok_or_else(|| anyhow!("goal catalog is empty"))?,
    }
    .clone();

    let deps = crate::cli::build_deps(&config).await?;
    let pool = deps.pool.clone();
    let starter = goal.starter_prompt.clone();
    let conversation = Conversation::start(
        goal,
        deps,
        config.conversation.compaction_threshold,
    );
    if args.debug_confirm {
        conversation.set_debug_confirm(true).await;
    }

    info!("conversation [{}] started", conversation.conversation_id().await);
    if !starter.is_empty() {
        println!("\n{} {starter}", style("agent>").green().bold());
    }

    repl(&conversation).await?;

    conversation.end_chat().await;
    conversation.join().await;
    pool.cleanup().await;
    Ok(())
}

pub(crate) async fn run_resume(args: CliArgs) -> Result<()> {
    let config = RuntimeConfig::load(args.config.as_deref()).await?;
    let deps = crate::cli::build_deps(&config).await?;

    let Some(id) = &args.conversation_id else {
        return Err(anyhow!("usage: confab resume <conversation-id>"));
    };
    let store = deps.store.clone().expect("build_deps always sets a store");
    let Some(snapshot) = store.load(id).await? else {
        println!("no persisted conversation with id {id}");
        return Ok(());
    };

    let pool = deps.pool.clone();
    let conversation = Conversation::resume(snapshot, deps);
    print_transcript(&conversation.history().await, 0);

    repl(&conversation).await?;

    conversation.end_chat().await;
    conversation.join().await;
    pool.cleanup().await;
    Ok(())
}

/// Line-based front door: plain text is a prompt; slash commands map to the
/// remaining signals.
async fn repl(conversation: &Conversation) -> Result<()> {
    println!(
        "{}",
        style("(/confirm approves a pending tool run, /end leaves the chat)").dim()
    );

    let mut printed = conversation.history().await.len();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", style("you>").cyan().bold());
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/end" | "/quit" => break,
            "/confirm" => conversation.confirm().await,
            "/debug-confirm on" => conversation.set_debug_confirm(true).await,
            "/debug-confirm off" => conversation.set_debug_confirm(false).await,
            _ => conversation.submit_prompt(input).await,
        }

        // Let the signal land before waiting for the machine to park.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let phase = conversation.settled().await;
        let history = conversation.history().await;
        print_transcript(&history, printed);
        printed = history.len();

        if phase == Phase::Done {
            println!("{}", style("conversation finished").dim());
            break;
        }
        if phase == Phase::AwaitingConfirmation {
            println!("{}", style("(type /confirm to run the proposed tool)").dim());
        }
    }
    Ok(())
}

fn print_transcript(history: &[Message], from: usize) {
    for message in &history[from.min(history.len())..] {
        match message.actor {
            Actor::User => {}
            Actor::Agent => println!("{} {}", style("agent>").green().bold(), message.content),
            Actor::ToolResult => {
                println!("{} {}", style("tool>").yellow().bold(), message.content)
            }
            Actor::UserConfirmedToolRun => {
                println!("{}", style(&message.content).dim())
            }
            Actor::ConversationSummary => {
                println!("{} {}", style("summary>").magenta().bold(), message.content)
            }
        }
    }
}
