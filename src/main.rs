#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use zcfleet::background::BackgroundCoordinator;
use zcfleet::deploy::{DeployRequest, StdoutProgress};
use zcfleet::frontend::{self, Frontend, console};
use zcfleet::instance::InstanceId;
use zcfleet::{AppState, config};

#[derive(Parser, Debug)]
#[command(name = "zcfleet")]
#[command(version)]
#[command(about = "Deploy and supervise bot processes from chat.", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "fleet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the supervisor with the console front end
    Serve,

    /// Deploy one instance and wait for the outcome
    Deploy {
        /// Instance type (telegram, process)
        #[arg(long)]
        kind: Option<String>,
        /// Credential for types that need one
        #[arg(long)]
        token: Option<String>,
        /// Source repository URL
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Start command, run with `sh -c` in the workspace
        #[arg(long)]
        start: Option<String>,
        /// Dependency install command
        #[arg(long, conflicts_with = "no_build")]
        build: Option<String>,
        /// Skip the dependency install step
        #[arg(long)]
        no_build: bool,
        /// Extra environment as KEY=VALUE,KEY=VALUE
        #[arg(long)]
        env: Option<String>,
    },

    /// List deployments, newest first
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Stop an instance
    Stop { id: InstanceId },

    /// Restart an instance from its stored recipe
    Restart { id: InstanceId },

    /// Probe an instance now
    Status { id: InstanceId },

    /// Print the end of an instance log
    Logs {
        id: InstanceId,
        #[arg(short = 'n', long, default_value_t = frontend::commands::DEFAULT_LOG_LINES)]
        lines: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output and console replies.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zcfleet=info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("setting default subscriber failed: {e}"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let result = runtime.block_on(run(cli));
    // The console's stdin read cannot be cancelled; don't wait on it.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let state = AppState::open(config)?;

    match cli.command {
        Commands::Serve => serve(state).await,
        Commands::Deploy {
            kind,
            token,
            repo,
            branch,
            start,
            build,
            no_build,
            env,
        } => {
            let defaults = &state.config.defaults;
            let Some(source_url) = repo.or_else(|| defaults.source_url.clone()) else {
                bail!("--repo is required when no default repository is configured");
            };
            let build_command = if no_build {
                None
            } else {
                build.or_else(|| Some(defaults.build_command.clone()).filter(|c| !c.is_empty()))
            };
            let request = DeployRequest {
                kind: kind.unwrap_or_else(|| defaults.kind.clone()),
                token,
                source_url,
                branch: branch.unwrap_or_else(|| defaults.branch.clone()),
                start_command: start.unwrap_or_else(|| defaults.start_command.clone()),
                build_command,
                env_vars: env,
            };
            let progress = StdoutProgress::new("deploy");
            let instance = state.orchestrator.execute(request, &progress).await?;
            println!(
                "Deployed '{}' as #{} (PID {})",
                instance.name,
                instance.id,
                instance.pid().unwrap_or_default()
            );
            Ok(())
        }
        Commands::List { json } => {
            let instances = state.lifecycle.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&instances)?);
            } else {
                println!("{}", frontend::render_list(&instances).message);
            }
            Ok(())
        }
        Commands::Stop { id } => {
            let instance = state.lifecycle.stop(id).await?;
            println!("Stopped '{}' (#{})", instance.name, instance.id);
            Ok(())
        }
        Commands::Restart { id } => {
            let instance = state.lifecycle.restart(id).await?;
            println!(
                "Restarted '{}' as PID {} (restart #{})",
                instance.name,
                instance.pid().unwrap_or_default(),
                instance.restart_count
            );
            Ok(())
        }
        Commands::Status { id } => {
            let report = state.lifecycle.status(id).await?;
            println!("{}", frontend::render_status(&report).message);
            Ok(())
        }
        Commands::Logs { id, lines } => {
            print!("{}", state.lifecycle.logs(id, lines).await?);
            println!();
            Ok(())
        }
    }
}

/// Long-running mode: sweep stale rows, then supervise until Ctrl-C. The
/// console may close earlier (EOF on stdin) without stopping supervision.
async fn serve(state: AppState) -> Result<()> {
    state.lifecycle.startup_sweep()?;

    let frontend = Arc::new(Frontend::new(state.clone()));
    let supervisor = state.supervisor();

    let mut coordinator = BackgroundCoordinator::new();
    coordinator.spawn("supervisor", move |rx| supervisor.run(rx));
    coordinator.spawn("console", move |rx| console::run(frontend, rx));

    info!("zcfleet serving; type /help, Ctrl-C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("interrupt received, shutting down");

    coordinator.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
