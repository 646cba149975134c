//! Error types for monsync
//!
//! Nothing in the HA core recovers locally: every variant below ends the task
//! that produced it and is pushed onto the process-wide error channel.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Protocol Errors ===
    #[error("Received environment {got} is not the one we expected ({expected})")]
    UnexpectedEnvironment { expected: String, got: String },

    #[error("Received empty environment")]
    EmptyEnvironment,

    #[error("Failed to decode heartbeat: {0}")]
    HeartbeatDecode(#[from] serde_json::Error),

    #[error("Malformed dump event {id}: {reason}")]
    MalformedEvent { id: String, reason: String },

    // === Storage Errors ===
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    // === Source Errors ===
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short label for log lines and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::UnexpectedEnvironment { .. } | Error::EmptyEnvironment => "protocol",
            Error::HeartbeatDecode(_) | Error::MalformedEvent { .. } => "decode",
            Error::Sql(_) | Error::Storage(_) => "storage",
            Error::Redis(_) | Error::ChannelClosed(_) => "source",
            Error::InvalidConfig(_) | Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed("receiver dropped".into())
    }
}
