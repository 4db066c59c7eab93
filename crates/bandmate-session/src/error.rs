//! Session error types.

use std::path::PathBuf;

use bandmate_core::{AgentId, BusError, SessionState};
use thiserror::Error;

/// Session-level failures, surfaced directly to the caller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),
    #[error("Session is not running (state: {0})")]
    NotRunning(SessionState),
    #[error("Session has been stopped and cannot restart")]
    Terminated,
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
