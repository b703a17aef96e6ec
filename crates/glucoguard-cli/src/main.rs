//! Command-line interface for the GlucoGuard actuation controller.

mod server;
mod service;
mod shutdown;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use glucoguard_commands::{GatewayConfig, HttpCommandGateway};
use glucoguard_core::{CommandDispatcher, ControllerConfig};

use crate::server::ServerState;
use crate::service::Service;

/// GlucoGuard - closed-loop glucose actuation controller.
#[derive(Parser, Debug)]
#[command(name = "glucoguard")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller until Ctrl+C or SIGTERM.
    Run {
        /// Configuration file. Built-in defaults are used when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Load and validate a configuration file.
    CheckConfig {
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Read a device resource through the command gateway.
    Query {
        device: String,
        command: String,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Run { config } => run(load_config(config.as_deref())?).await,
        Command::CheckConfig { path } => check_config(&path),
        Command::Query {
            device,
            command,
            config,
        } => query(load_config(config.as_deref())?, &device, &command).await,
    }
}

fn init_logging(verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("glucoguard=debug")
        } else {
            tracing_subscriber::EnvFilter::new("glucoguard=info")
        }
    });

    // GLUCOGUARD_LOG_JSON=1 for log shippers
    if std::env::var("GLUCOGUARD_LOG_JSON").is_ok_and(|v| v == "1" || v == "true") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    match path {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let mut config = ControllerConfig::default();
            config.apply_env_overrides();
            config.validate().context("Invalid default configuration")?;
            Ok(config)
        }
    }
}

async fn run(config: ControllerConfig) -> Result<()> {
    let service = Service::start(&config)?;

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind status server to {}", config.server.bind))?;
    info!(addr = %config.server.bind, "Status server listening");

    let app = server::router(ServerState::new(
        service.controller.clone(),
        service.ingress.clone(),
    ));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("Status server failed")?;

    let grace = config.shutdown_grace();
    info!(grace_secs = grace.as_secs(), "Shutting down controller");
    let report = service.shutdown(grace).await;

    if report.incomplete.is_empty() {
        info!(
            completed = report.completed_tasks,
            aborted = report.aborted_tasks,
            "Shutdown complete"
        );
    } else {
        for episode in &report.incomplete {
            warn!(
                device = %episode.device,
                episode_id = %episode.id,
                state = episode.state.as_str(),
                "Actuator may still be ON"
            );
        }
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = ControllerConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    println!("Configuration OK: {}", path.display());
    for rule in &config.rules {
        println!(
            "  {} {} {} -> {} (cooldown {}s)",
            rule.sensor,
            rule.comparator.as_str(),
            rule.bound,
            rule.actuator,
            rule.cooldown_secs
        );
    }
    for binding in &config.ingress.bindings {
        println!("  topic {} -> {}/{}", binding.topic, binding.device, binding.sensor);
    }
    Ok(())
}

async fn query(config: ControllerConfig, device: &str, command: &str) -> Result<()> {
    let gateway = HttpCommandGateway::new(&GatewayConfig::new(
        &config.dispatch.base_url,
        config.dispatch.timeout(),
    ))?;
    let response = gateway.query(device, command).await?;
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}
