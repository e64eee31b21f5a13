//! # hgcmd
//!
//! Asynchronous execution of Mercurial commands for front-ends that must
//! never block while a command runs.
//!
//! Commands are queued on a [`CommandAgent`] as [`CommandSession`]s and run
//! strictly one after another by a single worker, either a fresh subprocess
//! per command ([`WorkerKind::Process`]) or one persistent command server
//! speaking the framed pipe protocol ([`WorkerKind::Server`]). Output,
//! progress and completion are published as [`AgentEvent`]s; prompts of a
//! running command are answered by the session's
//! [`InteractionHandler`](interaction::InteractionHandler).
//!
//! ## Quick Start
//!
//! ```no_run
//! use hgcmd::{AgentOptions, CommandAgent, WorkerKind};
//!
//! #[tokio::main]
//! async fn main() -> hgcmd::Result<()> {
//!     let options = AgentOptions::builder()
//!         .cwd("/path/to/repo")
//!         .worker_kind(WorkerKind::Server)
//!         .build();
//!     let agent = CommandAgent::new(options)?;
//!
//!     let session = agent.run_command(["log", "-l", "3"]);
//!     session.wait().await;
//!     println!("exit code {}", session.exit_code());
//!
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Capturing output
//!
//! ```no_run
//! # use hgcmd::{AgentOptions, CommandAgent};
//! # async fn example(agent: CommandAgent) -> hgcmd::Result<()> {
//! let session = agent.run_command(["cat", "-r", "tip", "README"]);
//! session.set_capture_output(true)?;
//! session.wait().await;
//! let contents = session.read_all();
//! # Ok(())
//! # }
//! ```
//!
//! `set_capture_output` races with the agent starting the session; a session
//! that already started returns [`CommandError::InvalidState`].
//!
//! ## Architecture
//!
//! - [`types`]: command lines, records, service states, options
//! - [`codec`]: message and progress record codec
//! - [`protocol`]: command server framing and hello block
//! - [`interaction`]: prompt and capture callbacks
//! - [`transport`]: child processes and their I/O
//! - [`worker`]: the two service worker kinds
//! - [`session`]: command sessions
//! - [`agent`]: the session queue and its control task
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod codec;
pub mod error;
pub mod interaction;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod worker;

// Re-export commonly used types for external API
pub use agent::{AgentEvent, CommandAgent, Interaction};
pub use error::{CommandError, Result};
pub use session::CommandSession;
pub use types::{
    AgentOptions, AgentOptionsBuilder, CommandLine, ConfigOverride, ConfigSource, OutputRecord,
    ProgressRecord, ServiceState, SessionId, WorkerKind,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
