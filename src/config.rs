//! Supervisor configuration and worker command-line assembly.
//!
//! All defaults match what the worker expects when nothing is configured:
//! process every queue, a single worker thread, verbose output, and SIGQUIT
//! as the graceful shutdown request. The config is built once (from a TOML
//! file, from CLI overrides, or from `Default`) and never mutated after the
//! supervisor takes ownership of it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, WardenError};

/// Default queue pattern: process every queue.
pub const DEFAULT_QUEUE: &str = "*";

/// Default number of worker threads.
pub const DEFAULT_CONCURRENCY: u32 = 1;

/// Default bound on the graceful shutdown wait, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 15;

/// Signal sent to request a graceful worker shutdown.
///
/// The worker is expected to catch it and drain in-flight jobs before
/// exiting. SIGKILL is never a member here: it is reserved for the
/// supervisor's escalation path and cannot be configured away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StopSignal {
    #[default]
    Quit,
    Term,
    Int,
    Tstp,
}

impl StopSignal {
    #[cfg(unix)]
    pub(crate) fn as_raw(self) -> libc::c_int {
        match self {
            StopSignal::Quit => libc::SIGQUIT,
            StopSignal::Term => libc::SIGTERM,
            StopSignal::Int => libc::SIGINT,
            StopSignal::Tstp => libc::SIGTSTP,
        }
    }
}

/// Supervisor configuration.
///
/// Immutable once handed to [`crate::ProcessSupervisor`]. Every field has a
/// documented default, so `SupervisorConfig::default()` is a fully working
/// configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Worker executable invocation, split into argv tokens.
    pub program: Vec<String>,
    /// Queue pattern passed as `--queue`.
    pub queue: String,
    /// Worker thread count passed as `--concurrency`. Must be at least 1.
    pub concurrency: u32,
    /// Rails environment passed as `--environment` when set.
    pub environment: Option<String>,
    /// Worker-internal shutdown grace period, forwarded as `--timeout`.
    pub timeout: Option<u32>,
    /// Whether to pass `--verbose` to the worker.
    pub verbose: bool,
    /// Signal delivered to request a graceful shutdown.
    pub stop_signal: StopSignal,
    /// Environment variables merged into the child's environment.
    ///
    /// BTreeMap so the environment rendering in the launch log line is
    /// deterministic.
    pub extra_env: BTreeMap<String, String>,
    /// Bound on the graceful shutdown wait before escalating to SIGKILL.
    pub grace_period_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: vec!["bundle".into(), "exec".into(), "sidekiq".into()],
            queue: DEFAULT_QUEUE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            environment: None,
            timeout: None,
            verbose: true,
            stop_signal: StopSignal::default(),
            extra_env: BTreeMap::new(),
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        }
    }
}

impl SupervisorConfig {
    /// Load a configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults alone cannot enforce.
    pub fn validate(&self) -> Result<()> {
        if self.program.is_empty() {
            return Err(WardenError::Config("program must not be empty".into()));
        }
        if self.concurrency < 1 {
            return Err(WardenError::Config("concurrency must be at least 1".into()));
        }
        // A zero grace period would turn every stop into an immediate SIGKILL
        // with no chance for the worker to drain in-flight jobs.
        if self.grace_period_secs == 0 {
            return Err(WardenError::Config(
                "grace_period_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The graceful shutdown bound as a `Duration`.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Flag tokens appended to the worker invocation.
    ///
    /// The order is fixed for reproducibility: `--queue`, then `--verbose`
    /// (only when enabled), then `--environment` and `--timeout` (only when
    /// set), then `--concurrency`. Optional flags are omitted entirely when
    /// their source value is unset, never emitted empty. `--queue` and
    /// `--concurrency` always appear because their defaults guarantee a
    /// value.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec!["--queue".to_string(), self.queue.clone()];
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if let Some(ref environment) = self.environment {
            args.push("--environment".to_string());
            args.push(environment.clone());
        }
        if let Some(timeout) = self.timeout {
            args.push("--timeout".to_string());
            args.push(timeout.to_string());
        }
        args.push("--concurrency".to_string());
        args.push(self.concurrency.to_string());
        args
    }

    /// The full command line, as logged at launch.
    pub fn command_line(&self) -> String {
        self.program
            .iter()
            .cloned()
            .chain(self.worker_args())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `KEY=value` rendering of the extra environment for the launch log line.
    pub fn env_line(&self) -> String {
        self.extra_env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
