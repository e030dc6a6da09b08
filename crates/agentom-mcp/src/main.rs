//! Agentom MCP Server
//!
//! Runs the Agentom workspace tools as an MCP server over stdio.

use std::path::PathBuf;

use agentom::Config;
use agentom_mcp::AgentomServer;
use clap::Parser;
use rmcp::ServiceExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agentom-mcp", version, about = "Serve the Agentom tools over MCP (stdio)")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace root (overrides the configuration)
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing - output to stderr so it doesn't interfere with MCP stdio
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(root) = args.workspace {
        config.workspace.root = root;
    }

    tracing::info!(workspace = %config.workspace.root.display(), "Starting Agentom MCP server");

    let server = AgentomServer::from_config(&config)?;

    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP service: {}", e);
        })?;

    tracing::info!("Agentom MCP server running");

    service.waiting().await?;

    tracing::info!("Agentom MCP server shutting down");

    Ok(())
}
