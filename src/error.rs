use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Failed to spawn worker '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Worker process {0} no longer exists")]
    ProcessNotFound(u32),

    #[error("Failed to signal worker process {pid}: {source}")]
    Signal { pid: u32, source: std::io::Error },

    #[error("Failed to get PID of spawned worker")]
    MissingPid,

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WardenError>;
