//! `mcpexec` — list, call, and generate typed bindings for MCP tools.
//!
//! Loads server descriptors from `mcp_config.json`, drives the lazy
//! client runtime, and maps outcomes onto the process exit codes the
//! surrounding tooling expects: 0 success, 1 runtime failure, 2
//! configuration failure, 130 interrupted.

use clap::{Parser, Subcommand};
use mcpexec_client::{normalize_fields, McpClientManager};
use mcpexec_codegen::{classify_tool, generate_all};
use mcpexec_core::{McpConfig, McpExecError, McpExecResult, TOOL_SEPARATOR};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpexec", about = "mcpexec — lazy MCP tool execution runtime")]
struct Cli {
    /// Path to the server configuration file
    #[arg(short, long, default_value = "mcp_config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools from all enabled servers
    Tools,
    /// Call a single tool and print the normalized result
    Call {
        /// Tool identifier in the form serverName__toolName
        identifier: String,
        /// JSON object of tool parameters
        #[arg(long, default_value = "{}")]
        params: String,
        /// Per-call timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Generate typed Rust bindings for every discovered tool
    Generate {
        /// Output directory for generated modules
        #[arg(short, long, default_value = "src/servers")]
        out: PathBuf,
    },
}

const EXIT_RUNTIME: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run().await);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let manager = McpClientManager::new();
    if let Err(e) = load_and_initialize(&cli.config, &manager).await {
        error!(error = %e, "Failed to initialize");
        return EXIT_CONFIG;
    }

    let outcome = tokio::select! {
        result = execute(&manager, &cli.command) => match result {
            Ok(()) => 0,
            Err(e) => {
                error!(error = %e, "Command failed");
                exit_code_for(&e)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; shutting down");
            EXIT_INTERRUPTED
        }
    };

    if let Err(e) = manager.shutdown().await {
        warn!(error = %e, "Shutdown reported errors");
        if outcome == 0 {
            return EXIT_RUNTIME;
        }
    }
    outcome
}

async fn load_and_initialize(path: &Path, manager: &McpClientManager) -> McpExecResult<()> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        McpExecError::Configuration(format!(
            "Failed to read config file '{}': {e}",
            path.display()
        ))
    })?;
    let config = McpConfig::from_json(&content)?;
    manager.initialize(config.descriptors())
}

async fn execute(manager: &McpClientManager, command: &Commands) -> McpExecResult<()> {
    match command {
        Commands::Tools => {
            let all = manager.list_all_tools().await?;
            for (server, tools) in &all {
                for tool in tools {
                    let description =
                        (!tool.description.is_empty()).then_some(tool.description.as_str());
                    let safety = classify_tool(&tool.name, description);
                    let summary = description.and_then(|d| d.lines().next()).unwrap_or("");
                    println!(
                        "{server}{TOOL_SEPARATOR}{}  [{}]  {summary}",
                        tool.name,
                        safety.label()
                    );
                }
            }
        }
        Commands::Call {
            identifier,
            params,
            timeout_secs,
        } => {
            let params: serde_json::Value = serde_json::from_str(params).map_err(|e| {
                McpExecError::Configuration(format!("Invalid --params JSON: {e}"))
            })?;
            let result = match timeout_secs {
                Some(secs) => {
                    manager
                        .invoke_with_timeout(identifier, params, Duration::from_secs(*secs))
                        .await?
                }
                None => manager.invoke(identifier, params).await?,
            };
            let server = identifier
                .split_once(TOOL_SEPARATOR)
                .map(|(server, _)| server)
                .unwrap_or_default();
            let normalized = normalize_fields(&result, manager.strategy_for(server));
            println!("{}", serde_json::to_string_pretty(&normalized)?);
        }
        Commands::Generate { out } => {
            let written = generate_all(manager, out).await?;
            info!(files = written.len(), "Binding generation complete");
            for path in written {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

fn exit_code_for(e: &McpExecError) -> i32 {
    match e {
        McpExecError::Configuration(_) => EXIT_CONFIG,
        _ => EXIT_RUNTIME,
    }
}
