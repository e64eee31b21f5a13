//! Error types for command execution

use thiserror::Error;

/// Main error type for the command-execution subsystem
#[derive(Error, Debug)]
pub enum CommandError {
    /// Version-control executable not found or not installed
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    /// The OS refused to start the worker subprocess
    #[error("Failed to start process: {0}")]
    Spawn(String),

    /// The command server violated the channel protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command or reply could not be encoded for transmission
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A message or progress record could not be decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Operation not allowed in the current session/agent state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for command operations
pub type Result<T> = std::result::Result<T, CommandError>;

impl CommandError {
    /// Create an executable not found error
    #[must_use]
    pub fn executable_not_found() -> Self {
        Self::ExecutableNotFound(
            "hg not found. Install Mercurial or add it to PATH,\n\
             or specify the executable with AgentOptions::builder().executable(..)"
                .to_string(),
        )
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

