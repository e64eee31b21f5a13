//! Real child processes for the workers
//!
//! [`InvocationBuilder`] turns [`AgentOptions`](crate::types::AgentOptions)
//! into the one-shot or command-server command line, [`SubprocessLauncher`]
//! spawns it and wires the pipes to the control task.

mod command;
mod config;
mod lifecycle;
mod reader;
#[cfg(unix)]
pub(crate) mod signal;

pub use command::{InvocationBuilder, find_executable};
pub use config::{PLAIN_EXCEPT, RESERVED_ENV_VARS, child_environment};
pub use lifecycle::SubprocessLauncher;
