//! Core type definitions for the command-execution subsystem
//!
//! This module contains the value types shared by workers, sessions and the
//! agent: command lines, output/progress records, service states, session
//! identifiers and agent configuration.

pub mod command;
pub mod identifiers;
pub mod options;
pub mod records;
pub mod state;

// Re-export all types for convenience
pub use command::CommandLine;
pub use identifiers::SessionId;
pub use options::{
    AgentOptions, AgentOptionsBuilder, ConfigOverride, ConfigSource, WorkerKind,
    DEFAULT_EXTENSIONS, DEFAULT_READ_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use records::{CONTROL_LABEL, ERROR_LABEL, Labels, OutputRecord, ProgressRecord};
pub use state::ServiceState;
