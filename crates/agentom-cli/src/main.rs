//! Agentom CLI - interactive materials-science session
//!
//! Usage:
//!   agentom                          Start a session in ./workspace
//!   agentom --workspace DIR          Use another workspace root
//!   agentom --config agentom.toml    Load settings from a TOML file

use std::path::PathBuf;
use std::sync::Arc;

use agentom::agent::{data_access_agent, structure_agent};
use agentom::{CapabilityAgent, Config, Coordinator, InferenceBackend, SessionRuntime, ToolRegistry};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "agentom", version, about = "Multi-agent assistant for computational materials science")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Workspace root (overrides the configuration)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Model name (overrides the configuration)
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interleave with replies
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(root) = args.workspace {
        config.workspace.root = root;
    }
    if let Some(model) = args.model {
        config.backend.model = model;
    }
    config.validate()?;

    let backend: Arc<dyn InferenceBackend> = Arc::new(config.inference_backend()?);
    let context = Arc::new(config.tool_context()?);
    let workspace = Arc::clone(&context.workspace);
    let registry = ToolRegistry::with_builtins(context);

    let model = config.backend.model.clone();
    let rounds = config.agents.max_tool_rounds;
    let agents: Vec<Arc<dyn CapabilityAgent>> = vec![
        Arc::new(
            data_access_agent(&registry, Arc::clone(&backend), &model).with_max_tool_rounds(rounds),
        ),
        Arc::new(
            structure_agent(&registry, Arc::clone(&backend), &model).with_max_tool_rounds(rounds),
        ),
    ];
    let coordinator = Coordinator::new(&model, backend, agents)
        .with_max_delegations_per_turn(config.agents.max_delegations_per_turn);

    println!(
        "agentom {} | model {} | workspace {}",
        env!("CARGO_PKG_VERSION"),
        model,
        workspace.root().display()
    );
    println!("Type /help for commands, exit to quit.\n");

    let mut runtime = SessionRuntime::new(coordinator, workspace)
        .with_clear_temp_on_exit(config.workspace.clear_temp_on_exit)
        .with_prompt("> ");
    runtime
        .run(tokio::io::BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    Ok(())
}
