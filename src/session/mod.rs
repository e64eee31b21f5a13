//! Command sessions
//!
//! A [`CommandSession`] is a queue of command lines run one after another by
//! a `CommandAgent`, stopping at the first one that fails. The handle is
//! returned as soon as the session is queued; results become visible on it
//! while the agent's control task works through the queue.
//!
//! ```no_run
//! # use hgcmd::{AgentOptions, CommandAgent, CommandLine};
//! # async fn example() -> hgcmd::Result<()> {
//! let agent = CommandAgent::new(AgentOptions::default())?;
//! let session = agent.run_command_sequence(
//!     vec![CommandLine::from(["pull"]), CommandLine::from(["update"])],
//!     Default::default(),
//! );
//! session.wait().await;
//! if session.exit_code() != 0 {
//!     eprintln!("{}", session.error_string());
//! }
//! # Ok(())
//! # }
//! ```

pub(crate) mod sequencer;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::agent::Request;
use crate::error::{CommandError, Result};
use crate::interaction::CaptureBuffer;
use crate::types::{CommandLine, SessionId};

/// Message returned by `error_string` for sessions the user aborted
pub const TERMINATED_BY_USER: &str = "terminated by user";

/// Result fields published by the control task
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) bound: bool,
    pub(crate) capture_output: bool,
    pub(crate) running: bool,
    pub(crate) finished: bool,
    pub(crate) aborted: bool,
    pub(crate) exit_code: i32,
    pub(crate) error_text: String,
    pub(crate) warning_text: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            bound: false,
            capture_output: false,
            running: false,
            finished: false,
            aborted: false,
            exit_code: -1,
            error_text: String::new(),
            warning_text: String::new(),
        }
    }
}

/// State shared between a session handle and its core
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) cmdlines: Vec<CommandLine>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) capture: CaptureBuffer,
    finished: watch::Sender<bool>,
}

impl SessionShared {
    fn new(id: SessionId, cmdlines: Vec<CommandLine>) -> Self {
        Self {
            id,
            cmdlines,
            state: Mutex::new(SessionState::default()),
            capture: CaptureBuffer::new(),
            finished: watch::Sender::new(false),
        }
    }

    /// Record the final exit code and wake every waiter
    pub(crate) fn publish_finished(&self, code: i32) {
        {
            let mut state = self.state.lock();
            state.exit_code = code;
            state.running = false;
            state.finished = true;
        }
        self.finished.send_replace(true);
    }
}

/// Handle to a queued sequence of commands
#[derive(Clone)]
pub struct CommandSession {
    shared: Arc<SessionShared>,
    agent: Option<mpsc::WeakUnboundedSender<Request>>,
}

impl CommandSession {
    pub(crate) fn with_agent(
        cmdlines: Vec<CommandLine>,
        agent: mpsc::WeakUnboundedSender<Request>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(SessionId::new(), cmdlines)),
            agent: Some(agent),
        }
    }

    /// A session not connected to any agent
    pub(crate) fn detached(cmdlines: Vec<CommandLine>) -> Self {
        Self {
            shared: Arc::new(SessionShared::new(SessionId::new(), cmdlines)),
            agent: None,
        }
    }

    /// An already finished session with exit code -1
    ///
    /// Useful as a placeholder where a session is expected but nothing was
    /// run. Its id is [`SessionId::nil`].
    #[must_use]
    pub fn null() -> Self {
        let session = Self {
            shared: Arc::new(SessionShared::new(SessionId::nil(), Vec::new())),
            agent: None,
        };
        session.shared.publish_finished(-1);
        session
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Unique id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Queued command lines
    #[must_use]
    pub fn command_lines(&self) -> &[CommandLine] {
        &self.shared.cmdlines
    }

    /// Abort the session
    ///
    /// Best effort: a running command is interrupted, the commands after it
    /// are skipped, and a session still waiting for its turn is dropped from
    /// the queue. The session counts as aborted once it finished.
    pub fn abort(&self) {
        let Some(agent) = self.agent.as_ref().and_then(mpsc::WeakUnboundedSender::upgrade) else {
            return;
        };
        if agent.send(Request::AbortSession(self.id())).is_err() {
            log::debug!("session {}: agent already gone", self.id());
        }
    }

    /// Whether a command of this session has started and the session has not
    /// finished yet
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Whether every command ran or was skipped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().finished
    }

    /// Whether the session finished because the user aborted it
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        let state = self.shared.state.lock();
        state.finished && state.aborted
    }

    /// Exit code of the last command run, or -1 if none completed
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.shared.state.lock().exit_code
    }

    /// All `ui.error` output, or a fixed message if the user aborted
    #[must_use]
    pub fn error_string(&self) -> String {
        let state = self.shared.state.lock();
        if state.aborted {
            TERMINATED_BY_USER.to_string()
        } else {
            state.error_text.trim_end().to_string()
        }
    }

    /// All `ui.warning` output
    #[must_use]
    pub fn warning_string(&self) -> String {
        self.shared.state.lock().warning_text.trim_end().to_string()
    }

    /// Capture plain output instead of publishing it
    ///
    /// # Errors
    /// Returns [`CommandError::InvalidState`] once the session started
    pub fn set_capture_output(&self, enabled: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.bound {
            return Err(CommandError::invalid_state(
                "capture mode cannot change after the session started",
            ));
        }
        state.capture_output = enabled;
        Ok(())
    }

    /// Whether plain output is captured
    #[must_use]
    pub fn capture_output(&self) -> bool {
        self.shared.state.lock().capture_output
    }

    /// Remove and return up to `max` captured bytes
    #[must_use]
    pub fn read(&self, max: usize) -> Vec<u8> {
        self.shared.capture.read(max)
    }

    /// Remove and return all captured bytes
    #[must_use]
    pub fn read_all(&self) -> Vec<u8> {
        self.shared.capture.read_all()
    }

    /// Remove and return one captured line
    #[must_use]
    pub fn read_line(&self) -> Vec<u8> {
        self.shared.capture.read_line()
    }

    /// Look at up to `max` captured bytes without consuming them
    #[must_use]
    pub fn peek(&self, max: usize) -> Vec<u8> {
        self.shared.capture.peek(max)
    }

    /// Number of captured bytes not read yet
    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.shared.capture.len()
    }

    /// Whether a complete captured line can be read
    #[must_use]
    pub fn can_read_line(&self) -> bool {
        self.shared.capture.can_read_line()
    }

    /// Wait until the session finished
    pub async fn wait(&self) {
        let mut finished = self.shared.finished.subscribe();
        // The sender lives in `shared`, so it cannot close while we wait
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl PartialEq for CommandSession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for CommandSession {}

impl fmt::Debug for CommandSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CommandSession")
            .field("id", &self.shared.id)
            .field("cmdlines", &self.shared.cmdlines.len())
            .field("running", &state.running)
            .field("finished", &state.finished)
            .field("exit_code", &state.exit_code)
            .finish()
    }
}
