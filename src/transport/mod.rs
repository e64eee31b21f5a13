//! Transport layer for talking to worker subprocesses
//!
//! Workers never touch OS processes directly. They ask a [`Launcher`] to
//! start an [`Invocation`] and get back a [`ChildHandle`] for writing to the
//! child's stdin and interrupting it. Everything the child produces arrives
//! at the control task as [`IoEvent`]s tagged with the child's generation, so
//! late events from a previous child can be told apart from the current one.

pub mod subprocess;

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{CommandError, Result};

pub use subprocess::{InvocationBuilder, SubprocessLauncher, find_executable};

/// Sender half used by pipe reader tasks
pub type IoSender = mpsc::UnboundedSender<IoEvent>;

/// Receiver half drained by the control task
pub type IoReceiver = mpsc::UnboundedReceiver<IoEvent>;

/// Something a child process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEvent {
    /// Generation of the child that produced the event
    pub generation: u64,
    /// What happened
    pub kind: IoKind,
}

/// Kind of [`IoEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoKind {
    /// Bytes read from the child's stdout
    Stdout(Bytes),
    /// Bytes read from the child's stderr
    Stderr(Bytes),
    /// The child exited; negative codes are the terminating signal
    Exited(i32),
}

impl IoEvent {
    /// Create an event
    #[must_use]
    pub const fn new(generation: u64, kind: IoKind) -> Self {
        Self { generation, kind }
    }
}

/// A fully resolved child process command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Executable
    pub program: PathBuf,
    /// Arguments after the executable
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

/// Starts child processes for a worker
pub trait Launcher: Send {
    /// Spawn `invocation` and start forwarding its output
    ///
    /// # Errors
    /// Returns error if the OS refuses to start the process
    fn launch(&mut self, invocation: &Invocation) -> Result<ChildHandle>;
}

/// Control side of a running child process
///
/// Dropping the handle kills the child.
#[derive(Debug)]
pub struct ChildHandle {
    generation: u64,
    pid: Option<u32>,
    input: Option<mpsc::UnboundedSender<Bytes>>,
    kill: Option<oneshot::Sender<()>>,
}

impl ChildHandle {
    /// Wrap the channels of a spawned child
    #[must_use]
    pub const fn new(
        generation: u64,
        pid: Option<u32>,
        input: mpsc::UnboundedSender<Bytes>,
        kill: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            generation,
            pid,
            input: Some(input),
            kill,
        }
    }

    /// Generation tag of the child's [`IoEvent`]s
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id, if known
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queue bytes for the child's stdin
    ///
    /// # Errors
    /// Returns error if stdin was closed or the child is gone
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| CommandError::invalid_state("stdin already closed"))?;
        input
            .send(data.into())
            .map_err(|_| CommandError::Io(std::io::ErrorKind::BrokenPipe.into()))
    }

    /// Close the child's stdin once queued writes are flushed
    pub fn close_input(&mut self) {
        self.input = None;
    }

    /// Whether stdin is still open
    #[must_use]
    pub const fn is_input_open(&self) -> bool {
        self.input.is_some()
    }

    /// Deliver an interrupt to the child's process group
    pub fn interrupt(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            subprocess::signal::interrupt_group(pid);
            return;
        }
        self.kill();
    }

    /// Kill the child outright
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}
