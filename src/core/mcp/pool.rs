use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::AgentError;
use crate::core::goal::{McpServerDefinition, ServerIdentity, ToolDefinition};
use crate::core::mcp::McpSession;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide pool of tool-server sessions, keyed by normalized identity.
///
/// One instance is constructed at startup and shared by every conversation.
/// The map is mutex-guarded; a session itself serves at most one in-flight
/// call at a time, matching at most one outstanding tool call per
/// conversation.
#[derive(Default)]
pub struct McpSessionPool {
    sessions: Mutex<HashMap<ServerIdentity, Arc<McpSession>>>,
}

impl McpSessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled session for this definition, launching and
    /// initializing it on first use.
    pub async fn get_session(&self, def: &McpServerDefinition) -> Result<Arc<McpSession>> {
        if let Some(transport) = def.transport.as_deref() {
            if !transport.eq_ignore_ascii_case("stdio") {
                return Err(AgentError::UnsupportedTransport {
                    server: def.name.clone(),
                    transport: transport.to_string(),
                }
                .into());
            }
        }

        let identity = def.identity();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&identity) {
            return Ok(session.clone());
        }

        let session = McpSession::spawn(def).await?;
        sessions.insert(identity, session.clone());
        Ok(session)
    }

    /// Discover the server's tools for merging into a goal's runtime
    /// catalog. Called once per goal activation.
    pub async fn list_remote_tools(
        &self,
        def: &McpServerDefinition,
    ) -> Result<Vec<ToolDefinition>> {
        let session = self.get_session(def).await?;
        let remote = tokio::time::timeout(DISCOVERY_TIMEOUT, session.list_tools(&def.allowed_tools))
            .await
            .map_err(|_| anyhow::anyhow!("tool discovery timed out for [{}]", def.name))??;
        info!("discovered {} tools from [{}]", remote.len(), def.name);
        Ok(remote.iter().map(|t| t.to_tool_definition()).collect())
    }

    /// Close every session and release transport handles. Teardown failures
    /// are logged, never raised.
    pub async fn cleanup(&self) {
        let sessions: Vec<(ServerIdentity, Arc<McpSession>)> =
            self.sessions.lock().await.drain().collect();
        for (identity, session) in sessions {
            info!("closing tool server session [{identity}]");
            session.shutdown().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Drop for McpSessionPool {
    fn drop(&mut self) {
        // Children are spawned with kill_on_drop; an un-cleaned pool still
        // releases its processes when the owner goes away.
        if let Ok(sessions) = self.sessions.try_lock() {
            if !sessions.is_empty() {
                warn!("session pool dropped with {} live sessions", sessions.len());
            }
        }
    }
}
