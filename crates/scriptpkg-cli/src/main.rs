//! scriptpkg CLI
//!
//! Applies script-package lifecycle events from a TOML definition

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use eyre::WrapErr;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use scriptpkg_core::{LifecycleEvent, ResourceManager, ResourceState};
use scriptpkg_exec::error::HostRole;
use scriptpkg_exec::keys::ClientConfig;
use scriptpkg_exec::{ScriptEngine, stage};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "scriptpkg")]
#[command(about = "Run a script once per resource lifecycle event", long_about = None)]
struct Cli {
    /// Configuration file (default: $SCRIPTPKG_CONFIG, then ./scriptpkg.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a lifecycle event and print the result
    Apply {
        #[arg(short, long, value_enum)]
        event: Event,

        /// Resource state file
        #[arg(short, long, default_value = "scriptpkg-state.json")]
        state: PathBuf,

        /// Previous definition; on update, a changed plain package is replaced
        #[arg(long)]
        previous: Option<PathBuf>,
    },
    /// Validate the definition and show the staging decision
    Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum Event {
    Create,
    Update,
    Delete,
}

impl From<Event> for LifecycleEvent {
    fn from(event: Event) -> Self {
        match event {
            Event::Create => LifecycleEvent::Create,
            Event::Update => LifecycleEvent::Update,
            Event::Delete => LifecycleEvent::Delete,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config);
    let config = Config::load(&config_path)?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.engine.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    debug!(config = %config_path.display(), "configuration loaded");

    match cli.command {
        Commands::Apply {
            event,
            state,
            previous,
        } => apply(&config, event.into(), &state, previous.as_deref()).await,
        Commands::Validate => validate(&config),
    }
}

async fn apply(
    config: &Config,
    event: LifecycleEvent,
    state_path: &Path,
    previous: Option<&Path>,
) -> Result<()> {
    let engine = ScriptEngine::new(config.engine.settings.clone());
    let manager = ResourceManager::new(Arc::new(engine));

    let existing = match event {
        LifecycleEvent::Create => None,
        LifecycleEvent::Update | LifecycleEvent::Delete => Some(ResourceState::load(state_path)?),
    };

    let outcome = match (event, previous, &existing) {
        (LifecycleEvent::Update, Some(previous), Some(existing)) => {
            let old = Config::load(previous)?;
            manager.change(&old.package, &config.package, existing).await?
        }
        _ => {
            manager
                .apply(event, &config.package, existing.as_ref())
                .await?
        }
    };

    match &outcome.state {
        Some(state) => state.save(state_path)?,
        None if state_path.exists() => std::fs::remove_file(state_path)
            .wrap_err_with(|| format!("failed to remove {}", state_path.display()))?,
        None => {}
    }

    info!(event = %outcome.event, ran = outcome.ran, "event applied");
    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    let request = config.package.execution_request()?;

    if let Some(remote) = &request.remote {
        ClientConfig::from_descriptor(HostRole::Remote, remote)?;
    }
    if let Some(bastion) = &request.bastion {
        ClientConfig::from_descriptor(HostRole::Bastion, bastion)?;
    }
    let plan = stage::plan(&request.source, request.remote.is_some())?;

    println!("program:  {}", request.program.redacted());
    match (&request.remote, &request.bastion) {
        (Some(remote), Some(bastion)) => {
            println!("target:   {} via {}", remote.address(), bastion.address());
        }
        (Some(remote), None) => println!("target:   {}", remote.address()),
        _ => println!("target:   local"),
    }
    println!("staging:  {plan}");
    Ok(())
}
