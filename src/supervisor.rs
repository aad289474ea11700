//! Worker process lifecycle management.
//!
//! [`ProcessSupervisor`] owns at most one live child process at a time and
//! moves between three states: idle (nothing tracked), running (pid tracked),
//! and stopping (graceful signal sent, waiting for exit). `start()` is
//! defined as "ensure idle, then launch", so it never leaks a second child.
//!
//! Shutdown is the only part with real failure handling: the graceful signal
//! gets a bounded wait (the config's grace period, 15 seconds by default),
//! after which the supervisor escalates to SIGKILL and waits unconditionally.
//! A worker that vanished before it could be signaled is logged and treated
//! as already stopped.

use std::path::Path;

use tokio::process::{Child, Command};
use tokio::time;
use tracing::info;

use crate::config::{StopSignal, SupervisorConfig};
use crate::error::{Result, WardenError};

/// Handle to the spawned worker process.
///
/// The pid is captured at spawn time so it stays addressable for signal
/// delivery even after the child has exited.
struct WorkerHandle {
    child: Child,
    pid: u32,
}

/// Supervises a single worker subprocess.
///
/// Operations take `&mut self`; a single controlling caller is assumed, so
/// the "at most one tracked child" invariant needs no locking.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    child: Option<WorkerHandle>,
}

impl ProcessSupervisor {
    /// Create an idle supervisor, validating the configuration once.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, child: None })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The tracked worker pid, if a process is being supervised.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|handle| handle.pid)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Ensure idle, then launch the worker.
    ///
    /// Any currently tracked process is fully stopped before the new one is
    /// spawned, so two consecutive `start()` calls leave exactly one child
    /// alive. Spawn failures are fatal: they propagate to the caller, are not
    /// retried, and leave no tracked state behind.
    pub async fn start(&mut self) -> Result<()> {
        self.stop().await?;

        let command_line = self.config.command_line();
        let env_line = self.config.env_line();
        if env_line.is_empty() {
            info!("Starting sidekiq worker: {}", command_line);
        } else {
            info!("Starting sidekiq worker: {} ({})", command_line, env_line);
        }

        let mut command = Command::new(&self.config.program[0]);
        command
            .args(&self.config.program[1..])
            .args(self.config.worker_args());
        for (key, value) in &self.config.extra_env {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|e| WardenError::Spawn {
            command: command_line,
            source: e,
        })?;
        let pid = child.id().ok_or(WardenError::MissingPid)?;

        self.child = Some(WorkerHandle { child, pid });
        Ok(())
    }

    /// Stop the tracked worker, if any.
    ///
    /// A no-op (no signaling, no log output) when idle. Otherwise delivers
    /// the configured stop signal and waits up to the grace period for the
    /// worker to exit; on timeout it sends SIGKILL and waits without bound.
    /// A worker that no longer exists when signaled is treated as already
    /// stopped, not as an error.
    ///
    /// The handle is taken out of the supervisor before anything fallible
    /// runs, so the tracked pid is cleared on every path, including early
    /// error returns.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.child.take() else {
            return Ok(());
        };
        let pid = handle.pid;
        info!("Stopping sidekiq worker (pid {})...", pid);

        match deliver_stop_signal(&mut handle, self.config.stop_signal) {
            Ok(()) => {}
            Err(WardenError::ProcessNotFound(_)) => {
                info!("Lost the sidekiq worker subprocess (pid {})", pid);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        // Child::wait returns immediately for an already-exited child, so an
        // exited-but-unreaped worker never holds the timeout open.
        match time::timeout(self.config.grace_period(), handle.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_elapsed) => {
                info!(
                    "Sending SIGKILL to sidekiq worker (pid {}), as it's taking too long to shut down",
                    pid
                );
                handle.child.start_kill()?;
                handle.child.wait().await?;
            }
        }

        info!("Stopped sidekiq worker (pid {})", pid);
        Ok(())
    }

    /// `stop()` then `start()`. No additional logic.
    pub async fn restart(&mut self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Host hook: configuration reload requested. Restarts the worker.
    pub async fn reload(&mut self) -> Result<()> {
        info!("Restarting sidekiq worker...");
        self.restart().await
    }

    /// Host hook: "run all". The worker processes its queues continuously,
    /// so there is nothing to re-run; reports success without touching the
    /// process.
    pub fn run_all(&self) -> Result<()> {
        Ok(())
    }

    /// Host hook: watched files changed. The path list is accepted but not
    /// inspected; any change restarts the worker.
    pub async fn on_change<P: AsRef<Path>>(&mut self, _paths: &[P]) -> Result<()> {
        self.restart().await
    }
}

/// Deliver the graceful stop signal to the tracked worker.
///
/// On Unix this goes through `kill(2)` against the recorded pid so that a
/// process-not-found condition (ESRCH) is distinguishable from other
/// delivery failures. Elsewhere no graceful signal exists; the kill is
/// started directly on the child handle.
fn deliver_stop_signal(handle: &mut WorkerHandle, signal: StopSignal) -> Result<()> {
    #[cfg(unix)]
    {
        // SAFETY: kill(2) with a valid pid and signal number only delivers a
        // signal; no memory is touched.
        let rc = unsafe { libc::kill(handle.pid as libc::pid_t, signal.as_raw()) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::ESRCH => Err(WardenError::ProcessNotFound(handle.pid)),
            _ => Err(WardenError::Signal {
                pid: handle.pid,
                source: err,
            }),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal;
        handle.child.start_kill().map_err(|e| WardenError::Signal {
            pid: handle.pid,
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Config that runs a short shell script instead of a real worker.
    ///
    /// The grammar flags still get appended after the script; `sh -c` binds
    /// them to `$0`, `$1`, ... so they are inert.
    fn shell_config(script: &str) -> SupervisorConfig {
        SupervisorConfig {
            program: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            verbose: false,
            ..Default::default()
        }
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        // Signal 0 probes for existence without delivering anything.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn test_stop_on_idle_is_noop() {
        let mut supervisor = ProcessSupervisor::new(shell_config("exit 0")).unwrap();
        for _ in 0..3 {
            supervisor.stop().await.unwrap();
            assert!(!supervisor.is_running());
            assert!(supervisor.pid().is_none());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_tracks_pid() {
        let mut supervisor = ProcessSupervisor::new(shell_config("sleep 30")).unwrap();
        supervisor.start().await.unwrap();
        assert!(supervisor.is_running());
        assert!(supervisor.pid().unwrap() > 0);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal_and_leaves_idle() {
        let config = SupervisorConfig {
            program: vec!["definitely-not-a-real-worker-binary".to_string()],
            ..Default::default()
        };
        let mut supervisor = ProcessSupervisor::new(config).unwrap();
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, WardenError::Spawn { .. }));
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_twice_leaves_single_child() {
        let mut supervisor = ProcessSupervisor::new(shell_config("sleep 30")).unwrap();
        supervisor.start().await.unwrap();
        let first_pid = supervisor.pid().unwrap();

        supervisor.start().await.unwrap();
        let second_pid = supervisor.pid().unwrap();

        assert_ne!(first_pid, second_pid);
        // The first child was stopped and reaped before the second launch.
        assert!(!process_exists(first_pid));
        assert!(process_exists(second_pid));

        supervisor.stop().await.unwrap();
        assert!(!process_exists(second_pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_clears_handle_on_graceful_exit() {
        let mut supervisor = ProcessSupervisor::new(shell_config("sleep 30")).unwrap();
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
        assert!(!process_exists(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_returns_quickly_for_exited_child() {
        let mut supervisor = ProcessSupervisor::new(shell_config("exit 0")).unwrap();
        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The child is a zombie: signal delivery still succeeds and the wait
        // must return immediately rather than holding the grace period open.
        let started = Instant::now();
        supervisor.stop().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!supervisor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_recovers_lost_process() {
        let mut supervisor = ProcessSupervisor::new(shell_config("exit 0")).unwrap();
        supervisor.start().await.unwrap();

        // Reap the child behind the supervisor's back so the pid is gone by
        // the time stop() signals it.
        supervisor
            .child
            .as_mut()
            .unwrap()
            .child
            .wait()
            .await
            .unwrap();

        supervisor.stop().await.unwrap();
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_escalates_after_grace_period() {
        let mut config = shell_config("trap '' QUIT; sleep 30");
        config.grace_period_secs = 1;
        let mut supervisor = ProcessSupervisor::new(config).unwrap();
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = Instant::now();
        supervisor.stop().await.unwrap();
        let elapsed = started.elapsed();

        // SIGKILL no earlier than the grace period, return only after the
        // process is confirmed gone.
        assert!(elapsed >= Duration::from_secs(1), "stopped after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(10), "stopped after {:?}", elapsed);
        assert!(!supervisor.is_running());
        assert!(!process_exists(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_from_idle_matches_stop_then_start() {
        let mut supervisor = ProcessSupervisor::new(shell_config("sleep 30")).unwrap();
        assert!(!supervisor.is_running());

        supervisor.restart().await.unwrap();
        assert!(supervisor.is_running());
        supervisor.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_all_does_not_touch_process() {
        let mut supervisor = ProcessSupervisor::new(shell_config("sleep 30")).unwrap();
        supervisor.start().await.unwrap();
        let pid = supervisor.pid().unwrap();

        supervisor.run_all().unwrap();
        assert_eq!(supervisor.pid(), Some(pid));
        assert!(process_exists(pid));

        supervisor.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_extra_env_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("env.out");
        let script = format!(
            "printf %s \"$WARDEN_TEST_VALUE\" > {}; sleep 30",
            marker.display()
        );

        let mut config = shell_config(&script);
        config
            .extra_env
            .insert("WARDEN_TEST_VALUE".to_string(), "from-warden".to_string());

        let mut supervisor = ProcessSupervisor::new(config).unwrap();
        supervisor.start().await.unwrap();

        let mut contents = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Ok(read) = std::fs::read_to_string(&marker) {
                if !read.is_empty() {
                    contents = read;
                    break;
                }
            }
        }
        supervisor.stop().await.unwrap();

        assert_eq!(contents, "from-warden");
    }
}
