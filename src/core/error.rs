use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which side of a scope a limit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    InitialUser,
    ExecutionUser,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::InitialUser => f.write_str("initial user"),
            Identity::ExecutionUser => f.write_str("execution user"),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid username or password for user {0:?}")]
    Unauthorized(String),

    #[error("BUG: {0}")]
    ConfigIntegrity(String),

    #[error("limits for {identity} {name:?} are exceeded: max_concurrent_queries limit: {limit}")]
    AdmissionRejected {
        identity: Identity,
        name: String,
        limit: u32,
    },

    #[error("timeout for {identity} {name:?} exceeded: {limit:?}")]
    Timeout {
        identity: Identity,
        name: String,
        limit: Duration,
    },

    #[error("error while proxying request to {host}: {message}")]
    Transport { host: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
