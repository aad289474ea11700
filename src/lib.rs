//! sidekiq-warden - supervises a long-running Sidekiq worker process.
//!
//! The core of the crate is [`ProcessSupervisor`]: it launches the worker
//! with a command line assembled from [`SupervisorConfig`], tracks at most
//! one child process at a time, and guarantees that `stop()` leaves nothing
//! behind, escalating from the configured graceful signal to SIGKILL if the
//! worker does not exit within the grace period.
//!
//! A file-watching host (or the bundled binary) drives the supervisor through
//! its named lifecycle methods; the supervisor itself never runs a background
//! loop beyond the bounded wait during shutdown.

pub mod config;
pub mod error;
pub mod supervisor;

pub use config::{StopSignal, SupervisorConfig};
pub use error::{Result, WardenError};
pub use supervisor::ProcessSupervisor;
