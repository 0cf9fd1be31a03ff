//! Lazy-loading MCP client manager.
//!
//! The manager stores server descriptors at initialization and creates no
//! connections until a tool is first invoked (or a tool listing is
//! requested). Tool lists are cached per server for the lifetime of the
//! manager instance; at most one automatic discovery round-trip happens
//! per server unless a refresh is explicitly requested.
//!
//! Invokes addressed to the same server are serialized through a
//! per-server session lock; invokes addressed to different servers
//! proceed concurrently. Cancelling a caller releases the lock, so an
//! abandoned call never deadlocks the queue behind it.

use crate::connection::{ConnectionFactory, ServerConnection, StdioConnectionFactory};
use crate::protocol::ToolDescriptor;
use crate::unwrap;
use mcpexec_core::{
    McpExecError, McpExecResult, NormalizationStrategy, ServerDescriptor, ShutdownFailure,
    TOOL_SEPARATOR,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ServerSlot {
    descriptor: ServerDescriptor,
    /// Exclusive-access discipline for this server: connecting,
    /// discovery, and calls all pass through this lock.
    session: Mutex<SlotSession>,
}

#[derive(Default)]
struct SlotSession {
    connection: Option<Box<dyn ServerConnection>>,
    tools: Option<Vec<ToolDescriptor>>,
}

/// Lazy-loading MCP client manager.
///
/// Construct one instance and pass it to every call site; its lifecycle is
/// caller-owned. [`initialize`](Self::initialize) stores descriptors
/// without connecting; servers connect on first use and stay connected
/// until [`shutdown`](Self::shutdown) or an unrecoverable transport error.
pub struct McpClientManager {
    factory: Arc<dyn ConnectionFactory>,
    call_timeout: Duration,
    servers: RwLock<Option<HashMap<String, Arc<ServerSlot>>>>,
}

impl McpClientManager {
    /// Manager that spawns server subprocesses over stdio.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(StdioConnectionFactory::default()))
    }

    /// Manager with a custom connection factory (alternate transports,
    /// tests).
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            call_timeout: Duration::from_secs(30),
            servers: RwLock::new(None),
        }
    }

    /// Override the default per-call timeout (30 s).
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Whether [`initialize`](Self::initialize) has been called.
    pub fn is_initialized(&self) -> bool {
        self.servers.read().is_some()
    }

    /// Store server descriptors. Creates no connections.
    ///
    /// Fails with a configuration error when descriptor names collide or
    /// a descriptor lacks a launch command. Calling this on an already
    /// initialized manager is a no-op with a warning.
    pub fn initialize(&self, descriptors: Vec<ServerDescriptor>) -> McpExecResult<()> {
        let mut guard = self.servers.write();
        if guard.is_some() {
            warn!("Manager already initialized; ignoring repeated initialize");
            return Ok(());
        }

        let mut servers: HashMap<String, Arc<ServerSlot>> =
            HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.command.trim().is_empty() {
                return Err(McpExecError::Configuration(format!(
                    "Server '{}' has an empty launch command",
                    descriptor.name
                )));
            }
            let name = descriptor.name.clone();
            let slot = Arc::new(ServerSlot {
                descriptor,
                session: Mutex::new(SlotSession::default()),
            });
            if servers.insert(name.clone(), slot).is_some() {
                return Err(McpExecError::Configuration(format!(
                    "Duplicate server name '{name}' in configuration"
                )));
            }
        }

        info!(servers = servers.len(), "MCP client manager initialized");
        *guard = Some(servers);
        Ok(())
    }

    /// Call a tool, connecting to its server on first use.
    ///
    /// `identifier` has the form `"{server}__{tool}"`. Connection failures
    /// are not retried; the caller retries by re-invoking. The raw
    /// response is defensively unwrapped before being returned.
    pub async fn invoke(&self, identifier: &str, params: Value) -> McpExecResult<Value> {
        self.invoke_with_timeout(identifier, params, self.call_timeout)
            .await
    }

    /// [`invoke`](Self::invoke) with an explicit per-call timeout.
    ///
    /// A timeout surfaces as an execution error and does not evict the
    /// connection unless the transport itself is broken.
    pub async fn invoke_with_timeout(
        &self,
        identifier: &str,
        params: Value,
        timeout: Duration,
    ) -> McpExecResult<Value> {
        let (server, tool) = parse_identifier(identifier)?;
        let slot = self.slot(server)?;

        let mut session = slot.session.lock().await;
        let tools = self.tools_for(&slot, &mut session, false).await?;
        if !tools.iter().any(|t| t.name == tool) {
            let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
            names.sort_unstable();
            return Err(McpExecError::ToolNotFound(format!(
                "Tool '{tool}' not found on server '{server}'. Available tools: {names:?}"
            )));
        }

        info!(tool = %identifier, "Executing tool");
        let call_result = {
            let connection = live_connection(&session, server)?;
            connection.call_tool(tool, params, timeout).await
        };

        match call_result {
            Ok(result) => {
                if let Some(message) = unwrap::remote_error(&result) {
                    return Err(McpExecError::Execution {
                        identifier: identifier.to_string(),
                        message,
                    });
                }
                Ok(unwrap::unwrap_response(result))
            }
            Err(e) => {
                if e.is_transport() {
                    warn!(server = %server, "Transport broken; evicting connection");
                    session.connection = None;
                }
                Err(McpExecError::Execution {
                    identifier: identifier.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Tools exposed by one server, connecting lazily and caching the
    /// first discovery for the lifetime of this manager.
    pub async fn list_tools(&self, server: &str) -> McpExecResult<Vec<ToolDescriptor>> {
        let slot = self.slot(server)?;
        let mut session = slot.session.lock().await;
        self.tools_for(&slot, &mut session, false).await
    }

    /// Discard the cached tool list for one server and discover again.
    pub async fn refresh_tools(&self, server: &str) -> McpExecResult<Vec<ToolDescriptor>> {
        let slot = self.slot(server)?;
        let mut session = slot.session.lock().await;
        self.tools_for(&slot, &mut session, true).await
    }

    /// Tools from every enabled server, keyed by server name.
    ///
    /// Discovery fans out concurrently. A server that fails to connect or
    /// list is logged and skipped; partial results are preferable to
    /// total failure.
    pub async fn list_all_tools(&self) -> McpExecResult<BTreeMap<String, Vec<ToolDescriptor>>> {
        let slots: Vec<Arc<ServerSlot>> = {
            let guard = self.servers.read();
            let servers = guard
                .as_ref()
                .ok_or_else(|| not_initialized("list all tools"))?;
            servers
                .values()
                .filter(|slot| !slot.descriptor.disabled)
                .cloned()
                .collect()
        };

        if slots.is_empty() {
            warn!("No enabled servers configured");
            return Ok(BTreeMap::new());
        }

        let discoveries = slots.iter().map(|slot| async move {
            let mut session = slot.session.lock().await;
            let tools = self.tools_for(slot, &mut session, false).await;
            (slot.descriptor.name.clone(), tools)
        });

        let mut all = BTreeMap::new();
        for (name, result) in futures_util::future::join_all(discoveries).await {
            match result {
                Ok(tools) => {
                    debug!(server = %name, tools = tools.len(), "Discovered tools");
                    all.insert(name, tools);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Skipping server after discovery failure");
                }
            }
        }

        info!(
            servers = all.len(),
            tools = all.values().map(Vec::len).sum::<usize>(),
            "Tool discovery complete"
        );
        Ok(all)
    }

    /// Normalization strategy configured for a server.
    ///
    /// Unknown servers (and an uninitialized manager) default to
    /// [`NormalizationStrategy::Identity`].
    pub fn strategy_for(&self, server: &str) -> NormalizationStrategy {
        self.servers
            .read()
            .as_ref()
            .and_then(|servers| servers.get(server))
            .map(|slot| slot.descriptor.normalization)
            .unwrap_or_default()
    }

    /// Number of currently live connections.
    pub async fn connection_count(&self) -> usize {
        let slots: Vec<Arc<ServerSlot>> = match self.servers.read().as_ref() {
            Some(servers) => servers.values().cloned().collect(),
            None => return 0,
        };
        let mut count = 0;
        for slot in slots {
            if slot.session.lock().await.connection.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Close every live connection and reset to the uninitialized posture.
    ///
    /// Closing is best-effort: a failure on one server never prevents
    /// close attempts on the rest. All failures are aggregated into a
    /// single error naming each failing server. Internal state is cleared
    /// regardless of errors, so the manager can be re-initialized.
    /// In-flight invokes finish (or are abandoned) before their server's
    /// connection is closed.
    pub async fn shutdown(&self) -> McpExecResult<()> {
        let taken = self.servers.write().take();
        let Some(servers) = taken else {
            debug!("Shutdown requested on uninitialized manager");
            return Ok(());
        };

        info!(servers = servers.len(), "Shutting down MCP client manager");
        let mut slots: Vec<Arc<ServerSlot>> = servers.into_values().collect();
        slots.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));

        let mut failures = Vec::new();
        for slot in slots {
            let mut session = slot.session.lock().await;
            session.tools = None;
            if let Some(connection) = session.connection.take() {
                debug!(server = %slot.descriptor.name, "Closing connection");
                if let Err(e) = connection.close().await {
                    warn!(server = %slot.descriptor.name, error = %e, "Failed to close connection");
                    failures.push(ShutdownFailure {
                        server: slot.descriptor.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            info!("Shutdown complete");
            Ok(())
        } else {
            Err(McpExecError::Shutdown(failures))
        }
    }

    fn slot(&self, server: &str) -> McpExecResult<Arc<ServerSlot>> {
        let guard = self.servers.read();
        let servers = guard.as_ref().ok_or_else(|| not_initialized("use a server"))?;
        let slot = servers.get(server).ok_or_else(|| {
            let mut available: Vec<&str> = servers.keys().map(String::as_str).collect();
            available.sort_unstable();
            McpExecError::ToolNotFound(format!(
                "Server '{server}' not found in configuration. Available servers: {available:?}"
            ))
        })?;
        if slot.descriptor.disabled {
            return Err(McpExecError::ToolNotFound(format!(
                "Server '{server}' is disabled in configuration"
            )));
        }
        Ok(Arc::clone(slot))
    }

    async fn connect_if_needed(
        &self,
        slot: &ServerSlot,
        session: &mut SlotSession,
    ) -> McpExecResult<()> {
        if session.connection.is_none() {
            debug!(server = %slot.descriptor.name, "Lazily connecting");
            let connection = self.factory.connect(&slot.descriptor).await?;
            session.connection = Some(connection);
            info!(server = %slot.descriptor.name, "Connected to MCP server");
        }
        Ok(())
    }

    /// Cached tool list for a server, performing the discovery round-trip
    /// at most once unless `refresh` is set.
    async fn tools_for(
        &self,
        slot: &ServerSlot,
        session: &mut SlotSession,
        refresh: bool,
    ) -> McpExecResult<Vec<ToolDescriptor>> {
        self.connect_if_needed(slot, session).await?;
        if refresh {
            session.tools = None;
        }
        if let Some(tools) = &session.tools {
            debug!(server = %slot.descriptor.name, "Using cached tools");
            return Ok(tools.clone());
        }

        let list_result = {
            let connection = live_connection(session, &slot.descriptor.name)?;
            connection.list_tools(self.call_timeout).await
        };

        match list_result {
            Ok(tools) => {
                debug!(
                    server = %slot.descriptor.name,
                    tools = tools.len(),
                    "Cached tool list"
                );
                session.tools = Some(tools.clone());
                Ok(tools)
            }
            Err(e) => {
                if e.is_transport() {
                    session.connection = None;
                }
                Err(McpExecError::Connection {
                    server: slot.descriptor.name.clone(),
                    message: format!("could not list tools: {e}"),
                })
            }
        }
    }
}

impl Default for McpClientManager {
    fn default() -> Self {
        Self::new()
    }
}

fn live_connection<'s>(
    session: &'s SlotSession,
    server: &str,
) -> McpExecResult<&'s dyn ServerConnection> {
    session
        .connection
        .as_deref()
        .ok_or_else(|| McpExecError::Connection {
            server: server.to_string(),
            message: "connection unavailable".to_string(),
        })
}

fn not_initialized(operation: &str) -> McpExecError {
    McpExecError::Configuration(format!(
        "Cannot {operation}: manager is not initialized"
    ))
}

/// Split a `"{server}__{tool}"` identifier on its first separator.
fn parse_identifier(identifier: &str) -> McpExecResult<(&str, &str)> {
    match identifier.split_once(TOOL_SEPARATOR) {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(McpExecError::ToolNotFound(format!(
            "Invalid tool identifier '{identifier}'. Expected format: 'serverName__toolName'"
        ))),
    }
}
