//! Connection to a single MCP server over stdio.
//!
//! [`StdioConnection`] spawns the server subprocess, performs the
//! initialization handshake, and exchanges JSON-RPC 2.0 messages over the
//! child's stdin/stdout. A background reader task demultiplexes responses
//! by request id into oneshot channels.
//!
//! The [`ServerConnection`] trait is the seam between the connection
//! manager and the transport; tests drive the manager with in-memory
//! implementations and drive the real stdio logic over paired in-memory
//! streams via [`StdioConnection::over_stream`].

use crate::protocol::{InitializeResult, JsonRpcRequest, JsonRpcResponse, ToolDescriptor};
use async_trait::async_trait;
use mcpexec_core::{McpExecError, McpExecResult, ServerDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// MCP protocol revision this client speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Lifecycle states of a server connection.
///
/// `Disconnected` is represented by absence from the manager's live set;
/// a connection object only exists from the connect attempt onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Spawn and handshake in progress.
    Connecting,
    /// Handshake complete; calls may be sent.
    Ready,
    /// The transport broke; terminal. The manager evicts failed
    /// connections so the next invoke reconnects fresh.
    Failed,
    /// Closed by shutdown; terminal.
    Closed,
}

#[derive(Clone)]
struct StateCell(Arc<parking_lot::Mutex<ConnectionState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(parking_lot::Mutex::new(ConnectionState::Connecting)))
    }

    fn get(&self) -> ConnectionState {
        *self.0.lock()
    }

    fn set(&self, state: ConnectionState) {
        *self.0.lock() = state;
    }

    /// Transition to `Failed`, but never out of `Closed`.
    fn fail(&self) {
        let mut state = self.0.lock();
        if matches!(*state, ConnectionState::Connecting | ConnectionState::Ready) {
            *state = ConnectionState::Failed;
        }
    }
}

/// Failure classification for a single request on a live connection.
///
/// The manager maps these onto the caller-visible error taxonomy and uses
/// [`CallError::is_transport`] to decide whether to evict the connection.
#[derive(Debug)]
pub enum CallError {
    /// The transport is broken; the connection must be evicted.
    Transport(String),
    /// No response arrived in time. The connection may still be healthy.
    Timeout(Duration),
    /// The remote reported an error; the connection stays usable.
    Remote(String),
}

impl CallError {
    /// Whether this failure means the transport itself is broken.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport failure: {message}"),
            Self::Timeout(timeout) => write!(f, "request timed out after {timeout:?}"),
            Self::Remote(message) => write!(f, "{message}"),
        }
    }
}

/// One live session with one MCP server.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Name of the server this connection talks to.
    fn server_name(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// One `tools/list` discovery round-trip.
    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, CallError>;

    /// Call a tool and return the raw `tools/call` result.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, CallError>;

    /// Tear down the connection and its server process.
    async fn close(&self) -> McpExecResult<()>;
}

/// Creates connections on demand; the manager's lazy-connect seam.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Spawn/handshake a new connection for the described server.
    async fn connect(&self, descriptor: &ServerDescriptor)
        -> McpExecResult<Box<dyn ServerConnection>>;
}

/// [`ConnectionFactory`] that spawns server subprocesses over stdio.
pub struct StdioConnectionFactory {
    handshake_timeout: Duration,
}

impl StdioConnectionFactory {
    /// Factory with an explicit handshake timeout.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for StdioConnectionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ConnectionFactory for StdioConnectionFactory {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> McpExecResult<Box<dyn ServerConnection>> {
        let connection = StdioConnection::spawn(descriptor, self.handshake_timeout).await?;
        Ok(Box::new(connection))
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// MCP connection over newline-delimited JSON-RPC on a byte stream pair.
pub struct StdioConnection {
    server_name: String,
    stdin: Mutex<BoxedWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    state: StateCell,
    child: Option<Mutex<Child>>,
}

impl std::fmt::Debug for StdioConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioConnection")
            .field("server_name", &self.server_name)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl StdioConnection {
    /// Spawn the server subprocess and perform the initialization handshake.
    pub async fn spawn(
        descriptor: &ServerDescriptor,
        handshake_timeout: Duration,
    ) -> McpExecResult<Self> {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpExecError::Connection {
            server: descriptor.name.clone(),
            message: format!("failed to spawn '{}': {e}", descriptor.command),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpExecError::Connection {
            server: descriptor.name.clone(),
            message: "server stdin not available".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpExecError::Connection {
            server: descriptor.name.clone(),
            message: "server stdout not available".to_string(),
        })?;

        Self::establish(
            descriptor.name.clone(),
            Box::new(stdin),
            Box::new(stdout),
            Some(child),
            handshake_timeout,
        )
        .await
    }

    /// Build a connection over an arbitrary stream pair and perform the
    /// handshake. Used for non-subprocess transports and by tests.
    pub async fn over_stream<W, R>(
        server_name: impl Into<String>,
        writer: W,
        reader: R,
        handshake_timeout: Duration,
    ) -> McpExecResult<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::establish(
            server_name.into(),
            Box::new(writer),
            Box::new(reader),
            None,
            handshake_timeout,
        )
        .await
    }

    async fn establish(
        server_name: String,
        stdin: BoxedWriter,
        stdout: BoxedReader,
        child: Option<Child>,
        handshake_timeout: Duration,
    ) -> McpExecResult<Self> {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let state = StateCell::new();
        spawn_reader(server_name.clone(), stdout, pending.clone(), state.clone());

        let connection = Self {
            server_name,
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            state,
            child: child.map(Mutex::new),
        };

        match connection.handshake(handshake_timeout).await {
            Ok(init) => {
                info!(
                    server = %connection.server_name,
                    version = %init.protocol_version,
                    "MCP server initialized"
                );
                connection.state.set(ConnectionState::Ready);
                Ok(connection)
            }
            Err(e) => {
                connection.state.set(ConnectionState::Failed);
                if let Some(child) = &connection.child {
                    let _ = child.lock().await.kill().await;
                }
                Err(McpExecError::Connection {
                    server: connection.server_name.clone(),
                    message: format!("handshake failed: {e}"),
                })
            }
        }
    }

    async fn handshake(&self, timeout: Duration) -> Result<InitializeResult, CallError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpexec",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.request("initialize", Some(params), timeout).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| CallError::Remote(format!("invalid initialize result: {e}")))?;

        self.notify("notifications/initialized", None).await?;
        Ok(init)
    }

    /// Send a JSON-RPC request and wait for its response.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        if matches!(
            self.state.get(),
            ConnectionState::Failed | ConnectionState::Closed
        ) {
            return Err(CallError::Transport(format!(
                "connection to '{}' is no longer live",
                self.server_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let msg = match serde_json::to_string(&req) {
            Ok(msg) => msg,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(CallError::Transport(format!(
                    "failed to serialize request: {e}"
                )));
            }
        };

        if let Err(e) = self.write_line(&msg).await {
            self.pending.lock().await.remove(&id);
            self.state.fail();
            return Err(CallError::Transport(format!(
                "failed to write to server stdin: {e}"
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                warn!(
                    server = %self.server_name,
                    method = %method,
                    timeout_ms = timeout.as_millis() as u64,
                    "MCP request timed out"
                );
                Err(CallError::Timeout(timeout))
            }
            // Sender dropped: the reader task ended and drained the pending map.
            Ok(Err(_)) => {
                self.state.fail();
                Err(CallError::Transport(
                    "connection closed while awaiting response".to_string(),
                ))
            }
            Ok(Ok(resp)) => match resp.error {
                Some(err) => Err(CallError::Remote(format!(
                    "MCP error {}: {}",
                    err.code, err.message
                ))),
                None => Ok(resp.result.unwrap_or(Value::Null)),
            },
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or_else(|| serde_json::json!({})),
        });
        let serialized = serde_json::to_string(&msg)
            .map_err(|e| CallError::Transport(format!("failed to serialize notification: {e}")))?;
        self.write_line(&serialized).await.map_err(|e| {
            self.state.fail();
            CallError::Transport(format!("failed to write notification: {e}"))
        })
    }

    async fn write_line(&self, msg: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(msg.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }
}

#[async_trait]
impl ServerConnection for StdioConnection {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, CallError> {
        let result = self.request("tools/list", None, timeout).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| serde_json::json!([]));
        serde_json::from_value(tools)
            .map_err(|e| CallError::Remote(format!("failed to parse tools: {e}")))
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });
        self.request("tools/call", Some(params), timeout).await
    }

    async fn close(&self) -> McpExecResult<()> {
        self.state.set(ConnectionState::Closed);
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        if let Some(child) = &self.child {
            debug!(server = %self.server_name, "killing MCP server process");
            child.lock().await.kill().await?;
        }
        Ok(())
    }
}

fn spawn_reader(
    server_name: String,
    stdout: BoxedReader,
    pending: PendingMap,
    state: StateCell,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!(server = %server_name, "MCP server stdout closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                        Ok(resp) => {
                            if let Some(id) = resp.id {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let _ = tx.send(resp);
                                }
                            }
                            // Notifications (no id) are ignored.
                        }
                        Err(e) => {
                            debug!(
                                server = %server_name,
                                line = %trimmed,
                                error = %e,
                                "Non-JSON-RPC line from MCP server"
                            );
                        }
                    }
                }
                Err(e) => {
                    error!(server = %server_name, error = %e, "Error reading MCP server stdout");
                    break;
                }
            }
        }
        // Wake every in-flight request with a dropped sender so callers
        // surface a transport error instead of waiting out their timeout.
        state.fail();
        pending.lock().await.clear();
    });
}
