//! Amber CLI
//!
//! Runs, resumes and inspects codebase agent runs.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use amber::checkpoint::{create_store, CheckpointStore, UnavailableCheckpointStore};
use amber::harness::{create_harness, ScriptedHarness};
use amber::tools::{FixtureExecutor, HttpToolExecutor, ToolPolicy};
use amber::{
    supervisor, Config, Error, Harness, Response, ResponseStatus, Result, Supervisor,
    ToolExecutor, ToolRegistry, TriggerRequest,
};

#[derive(Parser)]
#[command(name = "amber")]
#[command(author, version, about = "Multi-mode codebase agent")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Capability overrides for offline runs
#[derive(clap::Args)]
struct Capabilities {
    /// Scripted harness file (YAML map of step to actions)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Tool fixtures file (JSON map of tool to output)
    #[arg(long)]
    tool_fixtures: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a trigger and print the response as JSON
    Run {
        /// Trigger request file, `-` for stdin
        #[arg(long, short)]
        request: String,

        #[command(flatten)]
        capabilities: Capabilities,
    },

    /// Resume a run from its latest checkpoint
    Resume {
        /// Run ID
        run_id: String,

        #[command(flatten)]
        capabilities: Capabilities,
    },

    /// Show which mode a trigger routes to
    Classify {
        /// Trigger request file, `-` for stdin
        #[arg(long, short)]
        request: String,
    },

    /// List runs, or the checkpoints of one run
    Checkpoints {
        /// Run ID
        #[arg(long)]
        run: Option<String>,
    },

    /// List the tool catalog
    Tools,

    /// Show current configuration
    Config,

    /// Initialize .amber directory
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing; logs go to stderr so stdout stays machine-readable
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Run {
            request,
            capabilities,
        } => {
            let request = read_request(&request)?;
            let supervisor = build_supervisor(&config, &capabilities).await?;
            let cancel = install_cancel_handler()?;
            let response = supervisor.execute_with_cancel(request, cancel).await?;
            finish(&response)?;
        }

        Commands::Resume {
            run_id,
            capabilities,
        } => {
            let supervisor = build_supervisor(&config, &capabilities).await?;
            let cancel = install_cancel_handler()?;
            let response = supervisor.resume_with_cancel(&run_id, cancel).await?;
            finish(&response)?;
        }

        Commands::Classify { request } => {
            let request = read_request(&request)?;
            let mode = supervisor::classify(&request)?;
            println!("{}", mode);
        }

        Commands::Checkpoints { run } => {
            let store = create_store(&config.checkpoint).await?;
            match run {
                Some(run_id) => {
                    let checkpoints = store.list(&run_id).await?;
                    if checkpoints.is_empty() {
                        return Err(Error::RunNotFound(run_id));
                    }
                    for cp in checkpoints {
                        println!(
                            "{:>4}  {:<28} {:<10} {}",
                            cp.sequence,
                            cp.step,
                            cp.state.run.status,
                            cp.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                None => {
                    for run in store.runs().await? {
                        println!(
                            "{}  {:<10} {:<10} {:<28} {}",
                            run.run_id,
                            run.mode,
                            run.status,
                            run.step,
                            run.updated_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }
        }

        Commands::Tools => {
            let registry = ToolRegistry::new(Arc::new(FixtureExecutor::new()), &config.tools)?;
            let read_only: Vec<&str> = registry
                .available(ToolPolicy::ReadOnly)
                .iter()
                .map(|s| s.name)
                .collect();
            for spec in registry.specs() {
                let effect = if read_only.contains(&spec.name) {
                    "read-only"
                } else {
                    "mutating"
                };
                println!("{:<30} {:<10} {}", spec.name, effect, spec.description);
            }
        }

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Failed to serialize config: {}", e),
        },

        Commands::Init => {
            let path = amber::config::init()?;
            info!("Initialized .amber directory ({})", path.display());
        }
    }

    Ok(())
}

fn read_request(source: &str) -> Result<TriggerRequest> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(Path::new(source))?
    };
    Ok(serde_json::from_str(&content)?)
}

async fn build_supervisor(config: &Config, capabilities: &Capabilities) -> Result<Supervisor> {
    let harness: Arc<dyn Harness> = match &capabilities.script {
        Some(path) => Arc::new(ScriptedHarness::load(path)?),
        None => create_harness(config)?,
    };
    let executor: Arc<dyn ToolExecutor> = match &capabilities.tool_fixtures {
        Some(path) => Arc::new(FixtureExecutor::load(path)?),
        None => Arc::new(HttpToolExecutor::new(&config.tools)?),
    };
    let tools = ToolRegistry::new(executor, &config.tools)?;
    let store: Arc<dyn CheckpointStore> = match create_store(&config.checkpoint).await {
        Ok(store) => store,
        Err(Error::CheckpointUnavailable(reason)) => {
            warn!("Checkpoint store unavailable, runs will not persist: {}", reason);
            Arc::new(UnavailableCheckpointStore::new(reason))
        }
        Err(e) => return Err(e),
    };
    info!(
        "Harness {}, tools via {}, checkpoints in {}",
        harness.name(),
        if capabilities.tool_fixtures.is_some() { "fixtures" } else { "gateway" },
        store.name()
    );

    Ok(Supervisor::new(
        config.supervisor.clone(),
        harness,
        Arc::new(tools),
        store,
    ))
}

/// Ctrl+C suspends the run at the next step boundary
fn install_cancel_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, suspending at the next step boundary");
        handle.cancel();
    })
    .map_err(|e| Error::Config(format!("Failed to set signal handler: {}", e)))?;
    Ok(token)
}

fn finish(response: &Response) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.status == ResponseStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
