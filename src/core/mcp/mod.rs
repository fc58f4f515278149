pub mod pool;

pub use pool::McpSessionPool;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::goal::{McpServerDefinition, ServerIdentity, ToolArgument, ToolDefinition};

const PROTOCOL_VERSION: &str = "2024-11-05";
const INIT_TIMEOUT: Duration = Duration::from_secs(15);
const STDERR_TAIL_CAP: usize = 2000;

#[derive(Serialize, Debug)]
struct RpcCall<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct RpcReply {
    #[allow(dead_code)]
    jsonrpc: String,
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// A tool advertised by a remote server.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl RemoteTool {
    /// Flatten the JSON-schema argument object into the engine's ordered
    /// argument list: required arguments first, the rest after.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let required: Vec<String> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut arguments: Vec<ToolArgument> = self
            .input_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(name, spec)| ToolArgument {
                        name: name.clone(),
                        arg_type: spec
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("string")
                            .to_string(),
                        description: spec
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        arguments.sort_by_key(|arg| !required.contains(&arg.name));

        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            arguments,
        }
    }
}

/// One initialized stdio session to a remote tool server.
///
/// The child's stdin is owned by a writer task and its stdout by a reader
/// task; callers correlate replies through the pending map. A session serves
/// at most one in-flight tool call at a time (one outstanding call per
/// conversation), but the plumbing is safe for more.
#[derive(Debug)]
pub struct McpSession {
    identity: ServerIdentity,
    child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<RpcReply>>>>,
    outbound: mpsc::Sender<String>,
    stderr_tail: Arc<Mutex<String>>,
}

impl McpSession {
    /// Launch the server process and run the protocol handshake.
    pub async fn spawn(def: &McpServerDefinition) -> Result<Arc<Self>> {
        let identity = def.identity();
        info!("starting tool server [{identity}]");

        let mut child = Command::new(&def.command)
            .args(&def.args)
            .envs(&def.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("no stdin pipe for [{identity}]"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("no stdout pipe for [{identity}]"))?;
        let stderr = child.stderr.take();

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(32);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let stderr_tail = Arc::new(Mutex::new(String::new()));

        let session = Arc::new(Self {
            identity: identity.clone(),
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            outbound,
            stderr_tail: stderr_tail.clone(),
        });

        // Writer: drains the outbound queue into the child's stdin.
        let mut writer = tokio::io::BufWriter::new(stdin);
        let writer_identity = identity.clone();
        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                debug!("mcp tx [{writer_identity}]: {line}");
                if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        // Reader: routes replies to their waiting callers.
        let reader_pending = pending.clone();
        let reader_identity = identity.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("mcp rx [{reader_identity}]: {line}");
                match serde_json::from_str::<RpcReply>(&line) {
                    Ok(reply) => {
                        let mut map = reader_pending.lock().await;
                        if let Some(tx) = map.remove(&reply.id) {
                            let _ = tx.send(reply);
                        }
                    }
                    Err(_) => debug!("ignoring non-reply line from [{reader_identity}]"),
                }
            }
            warn!("tool server [{reader_identity}] closed its stdout");
            reader_pending.lock().await.clear();
        });

        // Stderr: keep a bounded tail for failure reports.
        if let Some(stderr) = stderr {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = tail.lock().await;
                    if buf.len() < STDERR_TAIL_CAP {
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            });
        }

        match tokio::time::timeout(INIT_TIMEOUT, session.initialize()).await {
            Ok(Ok(())) => {
                info!("tool server [{identity}] initialized");
                Ok(session)
            }
            Ok(Err(e)) => {
                let tail = session.stderr_tail.lock().await.clone();
                Err(anyhow!(
                    "tool server [{identity}] failed to initialize: {e}; stderr: {tail}"
                ))
            }
            Err(_) => {
                let tail = session.stderr_tail.lock().await.clone();
                Err(anyhow!(
                    "tool server [{identity}] initialization timed out; stderr: {tail}"
                ))
            }
        }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "confab",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.request("initialize", Some(params)).await?;

        // Protocol requires the initialized notification before any request.
        let notification =
            serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        self.outbound.send(notification.to_string()).await?;
        Ok(())
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let call = RpcCall {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let line = serde_json::to_string(&call)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        self.outbound.send(line).await?;

        let reply = rx
            .await
            .map_err(|_| anyhow!("tool server [{}] dropped the connection", self.identity))?;
        if let Some(error) = reply.error {
            return Err(anyhow!("rpc error from [{}]: {error}", self.identity));
        }
        reply
            .result
            .ok_or_else(|| anyhow!("rpc reply from [{}] had no result", self.identity))
    }

    /// Discover the server's tools, honoring the allow-list when non-empty.
    pub async fn list_tools(&self, allowed: &[String]) -> Result<Vec<RemoteTool>> {
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| serde_json::from_value::<RemoteTool>(t.clone()).ok())
                    .filter(|t| allowed.is_empty() || allowed.contains(&t.name))
                    .collect()
            })
            .unwrap_or_default();
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({"name": name, "arguments": arguments});
        self.request("tools/call", Some(params)).await
    }

    /// Kill the child and release the transport. Never fails loudly.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to stop tool server [{}]: {e}", self.identity);
            }
        }
        self.pending.lock().await.clear();
    }
}
