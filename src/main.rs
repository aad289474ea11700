//! sidekiq-warden - thin host binary around the process supervisor.
//!
//! Loads an optional TOML config file, applies CLI overrides, starts the
//! worker, then waits for signals:
//! - SIGHUP restarts the worker (the "reload" hook)
//! - SIGUSR1 triggers the "run all" hook (a no-op for a queue worker)
//! - SIGTERM/SIGINT stop the worker and exit
//!
//! File watching is deliberately out of scope here: a watching host is
//! expected to call the supervisor's lifecycle methods itself.

use std::path::PathBuf;

use clap::Parser;
#[cfg(unix)]
use tokio::select;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

use sidekiq_warden::{ProcessSupervisor, SupervisorConfig};

/// Supervises a Sidekiq worker process
#[derive(Parser)]
#[command(name = "sidekiq-warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "SIDEKIQ_WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Worker queue pattern
    #[arg(long)]
    queue: Option<String>,

    /// Number of worker threads
    #[arg(long)]
    concurrency: Option<u32>,

    /// Environment to pass to the worker (e.g. "production")
    #[arg(long)]
    environment: Option<String>,

    /// Worker-internal shutdown timeout in seconds
    #[arg(long)]
    timeout: Option<u32>,

    /// Do not pass --verbose to the worker
    #[arg(long)]
    quiet: bool,
}

impl Cli {
    /// Build the supervisor config: file first, then CLI overrides on top.
    fn into_config(self) -> anyhow::Result<SupervisorConfig> {
        let mut config = match &self.config {
            Some(path) => SupervisorConfig::load(path)?,
            None => SupervisorConfig::default(),
        };

        if let Some(queue) = self.queue {
            config.queue = queue;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(environment) = self.environment {
            config.environment = Some(environment);
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if self.quiet {
            config.verbose = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let mut supervisor = ProcessSupervisor::new(config)?;
    supervisor.start().await?;

    #[cfg(unix)]
    {
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            select! {
                _ = sighup.recv() => {
                    supervisor.reload().await?;
                }
                _ = sigusr1.recv() => {
                    supervisor.run_all()?;
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down...");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, shutting down...");
    }

    supervisor.stop().await?;
    Ok(())
}
