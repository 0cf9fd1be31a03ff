#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the lazy connection manager, driven through the
//! `ConnectionFactory` seam with scripted in-memory connections.

use async_trait::async_trait;
use mcpexec_client::{
    normalize_fields, CallError, ConnectionFactory, ConnectionState, McpClientManager,
    ServerConnection, ToolDescriptor,
};
use mcpexec_core::{McpExecError, McpExecResult, NormalizationStrategy, ServerDescriptor};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Scripted fake servers
// ---------------------------------------------------------------------------

/// How a fake server behaves once "connected".
#[derive(Clone, Default)]
struct ServerScript {
    /// Tool names advertised by the fake server.
    tools: Vec<&'static str>,
    /// Artificial latency inside each `tools/call`.
    call_delay: Duration,
    /// Refuse the connect attempt.
    fail_connect: bool,
    /// Every call fails with a broken transport.
    break_on_call: bool,
    /// Every call reports a remote tool error.
    remote_error_on_call: bool,
    /// Refuse `tools/list`.
    fail_list: bool,
    /// Fail `close()`.
    fail_close: bool,
}

impl ServerScript {
    fn with_tools(tools: &[&'static str]) -> Self {
        Self {
            tools: tools.to_vec(),
            ..Self::default()
        }
    }
}

struct FakeServer {
    script: ServerScript,
    connect_attempts: AtomicUsize,
    list_calls: Arc<AtomicUsize>,
    call_windows: Arc<Mutex<Vec<(String, Instant, Instant)>>>,
}

struct FakeConnection {
    name: String,
    script: ServerScript,
    list_calls: Arc<AtomicUsize>,
    call_windows: Arc<Mutex<Vec<(String, Instant, Instant)>>>,
}

#[async_trait]
impl ServerConnection for FakeConnection {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Ready
    }

    async fn list_tools(&self, _timeout: Duration) -> Result<Vec<ToolDescriptor>, CallError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_list {
            return Err(CallError::Remote("listing refused".to_string()));
        }
        Ok(self
            .script
            .tools
            .iter()
            .map(|name| ToolDescriptor {
                name: (*name).to_string(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {}}),
                output_schema: None,
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        if self.script.break_on_call {
            return Err(CallError::Transport("pipe closed".to_string()));
        }
        if self.script.call_delay > timeout {
            return Err(CallError::Timeout(timeout));
        }
        let started = Instant::now();
        if !self.script.call_delay.is_zero() {
            tokio::time::sleep(self.script.call_delay).await;
        }
        let finished = Instant::now();
        self.call_windows
            .lock()
            .await
            .push((tool.to_string(), started, finished));
        if self.script.remote_error_on_call {
            return Ok(json!({
                "isError": true,
                "content": [{"type": "text", "text": "remote boom"}]
            }));
        }
        // Echo the arguments back as a serialized text block, like a real
        // server returning structured JSON as text.
        Ok(json!({
            "content": [{"type": "text", "text": arguments.to_string()}],
            "isError": false
        }))
    }

    async fn close(&self) -> McpExecResult<()> {
        if self.script.fail_close {
            return Err(McpExecError::Io(std::io::Error::other("kill failed")));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeFactory {
    servers: HashMap<String, FakeServer>,
}

impl FakeFactory {
    fn new() -> Self {
        Self::default()
    }

    fn server(mut self, name: &str, script: ServerScript) -> Self {
        self.servers.insert(
            name.to_string(),
            FakeServer {
                script,
                connect_attempts: AtomicUsize::new(0),
                list_calls: Arc::new(AtomicUsize::new(0)),
                call_windows: Arc::new(Mutex::new(Vec::new())),
            },
        );
        self
    }

    fn connect_attempts(&self, name: &str) -> usize {
        self.servers[name].connect_attempts.load(Ordering::SeqCst)
    }

    fn list_calls(&self, name: &str) -> usize {
        self.servers[name].list_calls.load(Ordering::SeqCst)
    }

    async fn call_windows(&self, name: &str) -> Vec<(String, Instant, Instant)> {
        self.servers[name].call_windows.lock().await.clone()
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(
        &self,
        descriptor: &ServerDescriptor,
    ) -> McpExecResult<Box<dyn ServerConnection>> {
        let server = self
            .servers
            .get(&descriptor.name)
            .unwrap_or_else(|| panic!("unscripted server '{}'", descriptor.name));
        server.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if server.script.fail_connect {
            return Err(McpExecError::Connection {
                server: descriptor.name.clone(),
                message: "spawn refused".to_string(),
            });
        }
        Ok(Box::new(FakeConnection {
            name: descriptor.name.clone(),
            script: server.script.clone(),
            list_calls: Arc::clone(&server.list_calls),
            call_windows: Arc::clone(&server.call_windows),
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn descriptor(name: &str) -> ServerDescriptor {
    ServerDescriptor {
        name: name.to_string(),
        command: "fake-server".to_string(),
        args: vec![],
        env: HashMap::new(),
        disabled: false,
        normalization: NormalizationStrategy::Identity,
    }
}

fn manager_with(factory: FakeFactory) -> (McpClientManager, Arc<FakeFactory>) {
    let factory = Arc::new(factory);
    let manager = McpClientManager::with_factory(factory.clone())
        .with_call_timeout(Duration::from_secs(5));
    (manager, factory)
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_initialize_creates_no_connections() {
    let (manager, factory) = manager_with(
        FakeFactory::new()
            .server("git", ServerScript::with_tools(&["git_status"]))
            .server("fetch", ServerScript::with_tools(&["fetch_url"])),
    );
    manager
        .initialize(vec![descriptor("git"), descriptor("fetch")])
        .unwrap();

    assert!(manager.is_initialized());
    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(factory.connect_attempts("git"), 0);
    assert_eq!(factory.connect_attempts("fetch"), 0);
}

#[tokio::test]
async fn test_initialize_rejects_duplicate_names() {
    let (manager, _) = manager_with(FakeFactory::new());
    let err = manager
        .initialize(vec![descriptor("git"), descriptor("git")])
        .unwrap_err();
    assert!(matches!(err, McpExecError::Configuration(_)));
    assert!(err.to_string().contains("git"));
}

#[tokio::test]
async fn test_initialize_rejects_empty_command() {
    let (manager, _) = manager_with(FakeFactory::new());
    let mut bad = descriptor("git");
    bad.command = "   ".to_string();
    let err = manager.initialize(vec![bad]).unwrap_err();
    assert!(matches!(err, McpExecError::Configuration(_)));
}

#[tokio::test]
async fn test_repeated_initialize_is_a_noop() {
    let (manager, _) = manager_with(FakeFactory::new().server("git", ServerScript::default()));
    manager.initialize(vec![descriptor("git")]).unwrap();
    // The second call is ignored rather than rejected.
    manager.initialize(vec![descriptor("other")]).unwrap();

    let err = manager
        .invoke("other__anything", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpExecError::ToolNotFound(_)));
}

// ---------------------------------------------------------------------------
// Invoke: identifiers, lazy connect, reuse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_identifier_creates_no_connection() {
    let (manager, factory) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();

    for bad in ["badidentifier", "git__", "__git_status"] {
        let err = manager.invoke(bad, json!({})).await.unwrap_err();
        assert!(matches!(err, McpExecError::ToolNotFound(_)), "{bad}");
    }
    assert_eq!(factory.connect_attempts("git"), 0);
    assert_eq!(manager.connection_count().await, 0);
}

#[tokio::test]
async fn test_unknown_server_lists_available() {
    let (manager, _) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let err = manager.invoke("svn__log", json!({})).await.unwrap_err();
    match err {
        McpExecError::ToolNotFound(message) => {
            assert!(message.contains("svn"));
            assert!(message.contains("git"));
        }
        other => panic!("expected ToolNotFound, got {other}"),
    }
}

#[tokio::test]
async fn test_first_invoke_connects_and_second_reuses() {
    let (manager, factory) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();
    assert_eq!(manager.connection_count().await, 0);

    let result = manager
        .invoke("git__git_status", json!({"path": "."}))
        .await
        .unwrap();
    // The echoed text block is unwrapped and parsed back into JSON.
    assert_eq!(result, json!({"path": "."}));
    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(factory.connect_attempts("git"), 1);

    manager
        .invoke("git__git_status", json!({"path": "/tmp"}))
        .await
        .unwrap();
    assert_eq!(factory.connect_attempts("git"), 1);
    assert_eq!(manager.connection_count().await, 1);
}

#[tokio::test]
async fn test_unknown_tool_on_known_server() {
    let (manager, factory) = manager_with(
        FakeFactory::new().server("git", ServerScript::with_tools(&["git_status", "git_log"])),
    );
    manager.initialize(vec![descriptor("git")]).unwrap();

    let err = manager.invoke("git__git_push", json!({})).await.unwrap_err();
    match err {
        McpExecError::ToolNotFound(message) => {
            assert!(message.contains("git_push"));
            assert!(message.contains("git_status"));
        }
        other => panic!("expected ToolNotFound, got {other}"),
    }
    // The lookup still connected (tool existence needs discovery)...
    assert_eq!(factory.connect_attempts("git"), 1);
    // ...and the connection survives for the next call.
    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Discovery caching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_discovery_happens_at_most_once() {
    let (manager, factory) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let tools = manager.list_tools("git").await.unwrap();
    assert_eq!(tools.len(), 1);
    manager.list_tools("git").await.unwrap();
    assert_eq!(factory.list_calls("git"), 1);

    // Invoke also reuses the cached list for its tool-existence check.
    manager.invoke("git__git_status", json!({})).await.unwrap();
    assert_eq!(factory.list_calls("git"), 1);
}

#[tokio::test]
async fn test_refresh_forces_second_round_trip() {
    let (manager, factory) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();

    manager.list_tools("git").await.unwrap();
    manager.refresh_tools("git").await.unwrap();
    assert_eq!(factory.list_calls("git"), 2);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_failure_is_not_retried_within_a_call() {
    let script = ServerScript {
        fail_connect: true,
        ..ServerScript::default()
    };
    let (manager, factory) = manager_with(FakeFactory::new().server("flaky", script));
    manager.initialize(vec![descriptor("flaky")]).unwrap();

    let err = manager.invoke("flaky__tool", json!({})).await.unwrap_err();
    assert!(matches!(err, McpExecError::Connection { .. }));
    assert_eq!(factory.connect_attempts("flaky"), 1);
    assert_eq!(manager.connection_count().await, 0);

    // Re-invoking is the retry: exactly one fresh attempt per call.
    let _ = manager.invoke("flaky__tool", json!({})).await.unwrap_err();
    assert_eq!(factory.connect_attempts("flaky"), 2);
}

#[tokio::test]
async fn test_broken_transport_evicts_and_reconnects() {
    let script = ServerScript {
        tools: vec!["tool"],
        break_on_call: true,
        ..ServerScript::default()
    };
    let (manager, factory) = manager_with(FakeFactory::new().server("git", script));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let err = manager.invoke("git__tool", json!({})).await.unwrap_err();
    match err {
        McpExecError::Execution { identifier, message } => {
            assert_eq!(identifier, "git__tool");
            assert!(message.contains("pipe closed"));
        }
        other => panic!("expected Execution, got {other}"),
    }
    // The broken connection was evicted...
    assert_eq!(manager.connection_count().await, 0);

    // ...so the next invoke reconnects fresh, while the tool cache
    // survives for the lifetime of the manager.
    let _ = manager.invoke("git__tool", json!({})).await.unwrap_err();
    assert_eq!(factory.connect_attempts("git"), 2);
    assert_eq!(factory.list_calls("git"), 1);
}

#[tokio::test]
async fn test_timeout_does_not_evict_connection() {
    let script = ServerScript {
        tools: vec!["slow"],
        call_delay: Duration::from_secs(60),
        ..ServerScript::default()
    };
    let (manager, factory) = manager_with(FakeFactory::new().server("git", script));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let err = manager
        .invoke_with_timeout("git__slow", json!({}), Duration::from_millis(50))
        .await
        .unwrap_err();
    match err {
        McpExecError::Execution { message, .. } => assert!(message.contains("timed out")),
        other => panic!("expected Execution, got {other}"),
    }
    assert_eq!(manager.connection_count().await, 1);
    assert_eq!(factory.connect_attempts("git"), 1);
}

#[tokio::test]
async fn test_remote_tool_error_keeps_connection() {
    let script = ServerScript {
        tools: vec!["tool"],
        remote_error_on_call: true,
        ..ServerScript::default()
    };
    let (manager, _) = manager_with(FakeFactory::new().server("git", script));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let err = manager.invoke("git__tool", json!({})).await.unwrap_err();
    match err {
        McpExecError::Execution { message, .. } => assert!(message.contains("remote boom")),
        other => panic!("expected Execution, got {other}"),
    }
    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_same_server_calls_are_serialized() {
    let script = ServerScript {
        tools: vec!["work"],
        call_delay: Duration::from_millis(50),
        ..ServerScript::default()
    };
    let (manager, factory) = manager_with(FakeFactory::new().server("git", script));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let (a, b) = tokio::join!(
        manager.invoke("git__work", json!({"n": 1})),
        manager.invoke("git__work", json!({"n": 2})),
    );
    a.unwrap();
    b.unwrap();

    let mut windows = factory.call_windows("git").await;
    assert_eq!(windows.len(), 2);
    windows.sort_by_key(|(_, started, _)| *started);
    let first_finished = windows[0].2;
    let second_started = windows[1].1;
    assert!(
        first_finished <= second_started,
        "calls to the same server overlapped"
    );
    assert_eq!(factory.connect_attempts("git"), 1);
}

#[tokio::test]
async fn test_different_servers_proceed_concurrently() {
    let slow = || ServerScript {
        tools: vec!["work"],
        call_delay: Duration::from_millis(150),
        ..ServerScript::default()
    };
    let (manager, factory) = manager_with(
        FakeFactory::new()
            .server("alpha", slow())
            .server("beta", slow()),
    );
    manager
        .initialize(vec![descriptor("alpha"), descriptor("beta")])
        .unwrap();

    let (a, b) = tokio::join!(
        manager.invoke("alpha__work", json!({})),
        manager.invoke("beta__work", json!({})),
    );
    a.unwrap();
    b.unwrap();

    let alpha = factory.call_windows("alpha").await;
    let beta = factory.call_windows("beta").await;
    let (alpha_started, alpha_finished) = (alpha[0].1, alpha[0].2);
    let (beta_started, beta_finished) = (beta[0].1, beta[0].2);
    assert!(
        alpha_started < beta_finished && beta_started < alpha_finished,
        "calls to different servers did not overlap"
    );
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_call() {
    let script = ServerScript {
        tools: vec!["work"],
        call_delay: Duration::from_millis(100),
        ..ServerScript::default()
    };
    let (manager, _) = manager_with(FakeFactory::new().server("git", script));
    manager.initialize(vec![descriptor("git")]).unwrap();

    let (invoked, shut) = tokio::join!(manager.invoke("git__work", json!({})), async {
        // Give the invoke a head start so the session lock is held.
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.shutdown().await
    });
    invoked.unwrap();
    shut.unwrap();
    assert!(!manager.is_initialized());
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Multi-server discovery and disabled servers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_all_tools_returns_partial_results() {
    let (manager, _) = manager_with(
        FakeFactory::new()
            .server("alpha", ServerScript::with_tools(&["a1", "a2"]))
            .server(
                "omega",
                ServerScript {
                    fail_connect: true,
                    ..ServerScript::default()
                },
            )
            .server(
                "mu",
                ServerScript {
                    fail_list: true,
                    ..ServerScript::default()
                },
            ),
    );
    manager
        .initialize(vec![descriptor("alpha"), descriptor("omega"), descriptor("mu")])
        .unwrap();

    let all = manager.list_all_tools().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["alpha"].len(), 2);
}

#[tokio::test]
async fn test_disabled_server_is_skipped_and_rejected() {
    let (manager, factory) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    let mut disabled = descriptor("git");
    disabled.disabled = true;
    manager.initialize(vec![disabled]).unwrap();

    let err = manager.invoke("git__git_status", json!({})).await.unwrap_err();
    match err {
        McpExecError::ToolNotFound(message) => assert!(message.contains("disabled")),
        other => panic!("expected ToolNotFound, got {other}"),
    }

    let all = manager.list_all_tools().await.unwrap();
    assert!(all.is_empty());
    assert_eq!(factory.connect_attempts("git"), 0);
}

// ---------------------------------------------------------------------------
// Shutdown aggregation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_aggregates_close_failures() {
    let (manager, factory) = manager_with(
        FakeFactory::new()
            .server("alpha", ServerScript::with_tools(&["a"]))
            .server("beta", ServerScript::with_tools(&["b"]))
            .server(
                "flaky",
                ServerScript {
                    tools: vec!["f"],
                    fail_close: true,
                    ..ServerScript::default()
                },
            ),
    );
    manager
        .initialize(vec![descriptor("alpha"), descriptor("beta"), descriptor("flaky")])
        .unwrap();

    // Connect all three.
    manager.invoke("alpha__a", json!({})).await.unwrap();
    manager.invoke("beta__b", json!({})).await.unwrap();
    manager.invoke("flaky__f", json!({})).await.unwrap();
    assert_eq!(manager.connection_count().await, 3);

    let err = manager.shutdown().await.unwrap_err();
    match err {
        McpExecError::Shutdown(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].server, "flaky");
        }
        other => panic!("expected Shutdown, got {other}"),
    }

    // State is cleared regardless of the failure.
    assert!(!manager.is_initialized());
    assert_eq!(manager.connection_count().await, 0);

    // The manager can be initialized and used again.
    manager.initialize(vec![descriptor("alpha")]).unwrap();
    manager.invoke("alpha__a", json!({})).await.unwrap();
    assert_eq!(factory.connect_attempts("alpha"), 2);
}

#[tokio::test]
async fn test_clean_shutdown_reports_no_error() {
    let (manager, _) =
        manager_with(FakeFactory::new().server("git", ServerScript::with_tools(&["git_status"])));
    manager.initialize(vec![descriptor("git")]).unwrap();
    manager.invoke("git__git_status", json!({})).await.unwrap();
    manager.shutdown().await.unwrap();
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Normalization flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invoke_then_normalize_by_server_strategy() {
    let (manager, _) =
        manager_with(FakeFactory::new().server("workitems", ServerScript::with_tools(&["get_item"])));
    let mut remapped = descriptor("workitems");
    remapped.normalization = NormalizationStrategy::PrefixRemap;
    manager.initialize(vec![remapped]).unwrap();

    assert_eq!(
        manager.strategy_for("workitems"),
        NormalizationStrategy::PrefixRemap
    );
    assert_eq!(manager.strategy_for("git"), NormalizationStrategy::Identity);

    // The generated-binding path: invoke, then normalize keyed by server.
    let raw = manager
        .invoke(
            "workitems__get_item",
            json!({"fields": {"system.title": "T", "custom.x": 1}}),
        )
        .await
        .unwrap();
    let normalized = normalize_fields(&raw, manager.strategy_for("workitems"));
    assert_eq!(
        normalized,
        json!({"fields": {"System.title": "T", "Custom.x": 1}})
    );
}
