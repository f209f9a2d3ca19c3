//! Worker environment and orchestrator for multi-environment agent swarms
//!
//! # Usage
//!
//! ```bash
//! # Three worker processes, two novelty agents each, ten rounds of IRV
//! swarm-agents run --workers 3 --agents 2 --rounds 10 --method irv
//!
//! # Same run with workers as in-process tasks, summaries written to ./out
//! swarm-agents run --in-process --folder ./out
//!
//! # Serve a single worker environment (normally launched by `run`)
//! swarm-agents worker --listen 127.0.0.1:5560
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::{
    serve_worker, MultiEnvConfig, MultiEnvironment, ProcessLauncher, Simulation, TaskLauncher,
    VotingMethod, WorkerLauncher,
};
use serde_json::Value;
use tracing::{info, warn};

use swarm_agents::agents;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve one worker environment hosting the demonstration agents
    Worker {
        /// Address to listen on
        #[arg(long)]
        listen: String,
    },

    /// Launch workers, spawn agents and run voting rounds
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of worker environments
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Agents to spawn per worker
    #[arg(long, default_value_t = 2)]
    agents: usize,

    /// Agent class to spawn
    #[arg(long, default_value = agents::NOVELTY)]
    class: String,

    /// Spawn arguments for every agent, as a JSON object
    #[arg(long)]
    agent_args: Option<String>,

    /// Peers each agent learns about before the first round
    #[arg(long, default_value_t = 0)]
    connections: usize,

    /// Rounds to run
    #[arg(long, default_value_t = 10)]
    rounds: usize,

    /// Voting method (irv, mean, best, least_worst, random)
    #[arg(long)]
    method: Option<VotingMethod>,

    /// Artifacts accepted per round
    #[arg(long)]
    accepted: Option<usize>,

    /// Folder receiving the environment and worker summaries
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Host workers as tasks in this process instead of child processes
    #[arg(long, default_value_t = false)]
    in_process: bool,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Worker { listen } => {
            // One cooperative scheduler per worker
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build worker runtime")?;
            runtime.block_on(worker(listen))
        }
        Command::Run(run_args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build orchestrator runtime")?;
            runtime.block_on(run(run_args))
        }
    }
}

async fn worker(listen: String) -> Result<()> {
    let config = MultiEnvConfig::from_env().context("Invalid worker environment")?;
    info!(listen = %listen, "Worker starting");
    serve_worker(&listen, agents::registry(), config.rpc)
        .await
        .with_context(|| format!("Worker on {listen} failed"))?;
    info!(listen = %listen, "Worker stopped");
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<MultiEnvConfig> {
    let mut config = match &args.config {
        Some(path) => MultiEnvConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => MultiEnvConfig::from_env().context("Invalid environment configuration")?,
    };
    if let Some(method) = args.method {
        config.voting.method = method;
    }
    if let Some(accepted) = args.accepted {
        config.voting.accepted = accepted;
    }
    Ok(config)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let agent_args: Value = match &args.agent_args {
        Some(json) => serde_json::from_str(json).context("--agent-args is not valid JSON")?,
        None => Value::Null,
    };

    let launcher: Box<dyn WorkerLauncher> = if args.in_process {
        Box::new(TaskLauncher::tcp(agents::registry(), config.rpc.clone()))
    } else {
        Box::new(ProcessLauncher::current_exe(&config).context("Cannot locate own executable")?)
    };

    info!(
        name = %config.name,
        workers = args.workers,
        method = %config.voting.method,
        accepted = config.voting.accepted,
        "Starting environment"
    );
    let env = MultiEnvironment::start(config, launcher, args.workers)
        .await
        .context("Failed to start environment")?;

    let mut simulation = Simulation::new(env);
    let outcome = drive(&mut simulation, &args, agent_args).await;
    let summary = simulation.into_env().destroy(args.folder.clone()).await;
    info!(summary = %summary, "Environment destroyed");
    outcome
}

async fn drive(simulation: &mut Simulation, args: &RunArgs, agent_args: Value) -> Result<()> {
    let env = simulation.env();
    let total = args.workers * args.agents;
    let spawned = env
        .spawn_n(&args.class, total, agent_args, None)
        .await
        .with_context(|| format!("Failed to spawn {total} {} agents", args.class))?;
    info!(count = spawned.len(), class = %args.class, "Agents spawned");

    if args.connections > 0 {
        let made = env
            .create_initial_connections(args.connections)
            .await
            .context("Failed to connect agents")?;
        info!(connections = made, "Initial connections made");
    }

    for _ in 0..args.rounds {
        let report = simulation.step().await.context("Round failed")?;
        for artifact in &report.accepted {
            info!(
                age = report.age,
                creator = %artifact.creator(),
                score = artifact.score,
                "Accepted"
            );
        }
        if report.proposed == 0 {
            warn!(age = report.age, "No agent proposed anything this round");
        }
    }
    Ok(())
}
