use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::core::llm::ChatMessage;

pub const DEFAULT_TRACE_CAP: usize = 20;

/// Fire-and-forget diagnostic dump of outbound LLM messages.
///
/// Keeps at most `cap` files in the trace directory, pruning the oldest by
/// file name. Write failures are swallowed and logged; tracing must never
/// affect a conversation.
pub struct MessageTrace {
    dir: PathBuf,
    cap: usize,
    seq: AtomicU64,
}

impl MessageTrace {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            cap: DEFAULT_TRACE_CAP,
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn record(&self, backend: &str, messages: &[ChatMessage]) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let dir = self.dir.clone();
        let cap = self.cap;
        let backend = backend.to_string();
        let messages = messages.to_vec();
        tokio::spawn(async move {
            if let Err(e) = write_entry(&dir, seq, &backend, &messages, cap).await {
                warn!("llm trace write failed: {e}");
            }
        });
    }
}

pub(crate) async fn write_entry(
    dir: &PathBuf,
    seq: u64,
    backend: &str,
    messages: &[ChatMessage],
    cap: usize,
) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let path = dir.join(format!("llm-{stamp}-{seq:06}.json"));
    let payload = json!({
        "backend": backend,
        "at": Utc::now().to_rfc3339(),
        "messages": messages,
    });
    tokio::fs::write(&path, serde_json::to_vec_pretty(&payload)?).await?;

    prune(dir, cap).await
}

async fn prune(dir: &PathBuf, cap: usize) -> Result<()> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("llm-") && name.ends_with(".json") {
            names.push(name);
        }
    }
    names.sort();

    while names.len() > cap {
        let oldest = names.remove(0);
        tokio::fs::remove_file(dir.join(&oldest)).await?;
    }
    Ok(())
}
