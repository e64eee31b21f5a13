//! Command agent: a FIFO of command sessions served by one worker
//!
//! [`CommandAgent`] is a cheap, cloneable handle. The worker, the session
//! queue and every protocol state machine live on a single control task
//! spawned at construction; the handle only sends requests to it and reads
//! the state it publishes.
//!
//! ```no_run
//! use hgcmd::{AgentEvent, AgentOptions, CommandAgent};
//!
//! # async fn example() -> hgcmd::Result<()> {
//! let agent = CommandAgent::new(AgentOptions::default())?;
//! let mut events = agent.subscribe();
//! let session = agent.run_command(["status"]);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         AgentEvent::OutputReceived { text, .. } => print!("{text}"),
//!         AgentEvent::CommandFinished(finished) if finished == session => break,
//!         _ => {}
//!     }
//! }
//! agent.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod event_loop;
mod events;
mod scheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

pub use events::AgentEvent;

pub(crate) use event_loop::Request;

use crate::error::{CommandError, Result};
use crate::interaction::{
    InteractionHandler, InteractiveHandler, NullInteraction, PromptRequest, Prompter,
};
use crate::session::CommandSession;
use crate::session::sequencer::SessionCore;
use crate::transport::{IoSender, SubprocessLauncher, find_executable};
use crate::types::{AgentOptions, CommandLine, ServiceState, WorkerKind};
use crate::worker::{ProcessWorker, ServerWorker, ServiceWorker, Worker};

use scheduler::AgentCore;

/// How a session answers prompts of its commands
#[derive(Default)]
pub enum Interaction {
    /// Answer every prompt with its default
    #[default]
    None,
    /// Use this handler as is
    Handler(Box<dyn InteractionHandler>),
    /// Ask this prompter for every prompt
    Prompter(Box<dyn Prompter>),
}

impl Interaction {
    /// Use a handler
    pub fn handler(handler: impl InteractionHandler + 'static) -> Self {
        Self::Handler(Box::new(handler))
    }

    /// Ask a prompter
    pub fn prompter(prompter: impl Prompter + 'static) -> Self {
        Self::Prompter(Box::new(prompter))
    }

    fn into_handler(self) -> Box<dyn InteractionHandler> {
        match self {
            Self::None => Box::new(NullInteraction::new()),
            Self::Handler(handler) => handler,
            Self::Prompter(prompter) => Box::new(InteractiveHandler::new(BoxedPrompter(prompter))),
        }
    }
}

struct BoxedPrompter(Box<dyn Prompter>);

impl Prompter for BoxedPrompter {
    fn prompt(&mut self, request: &PromptRequest) -> Option<String> {
        self.0.prompt(request)
    }
}

struct AgentInner {
    requests: mpsc::UnboundedSender<Request>,
    busy: Arc<AtomicUsize>,
    service_state: Arc<Mutex<ServiceState>>,
}

/// Handle to a running command agent
///
/// The control task shuts down once [`CommandAgent::shutdown`] is called or
/// every clone of the handle was dropped.
#[derive(Clone)]
pub struct CommandAgent {
    inner: Arc<AgentInner>,
}

impl CommandAgent {
    /// Start an agent driving the real executable
    ///
    /// # Errors
    /// Returns error if no tokio runtime is running or the executable cannot
    /// be found
    pub fn new(options: AgentOptions) -> Result<Self> {
        let program = find_executable(&options)?;
        log::debug!("using {}", program.display());
        let shared_options = Arc::new(options.clone());
        Self::spawn_with(&options, move |io_tx| {
            let launcher = SubprocessLauncher::new(io_tx);
            match shared_options.worker_kind {
                WorkerKind::Process => {
                    Worker::Process(ProcessWorker::new(launcher, program, shared_options))
                }
                WorkerKind::Server => {
                    Worker::Server(ServerWorker::new(launcher, program, shared_options))
                }
            }
        })
    }

    /// Start an agent around a custom worker
    ///
    /// `make_worker` receives the sender its children must report I/O to.
    ///
    /// # Errors
    /// Returns error if no tokio runtime is running
    pub fn spawn_with<W, F>(options: &AgentOptions, make_worker: F) -> Result<Self>
    where
        W: ServiceWorker + 'static,
        F: FnOnce(IoSender) -> W,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CommandError::invalid_state("CommandAgent needs a tokio runtime"))?;

        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicUsize::new(0));
        let service_state = Arc::new(Mutex::new(ServiceState::NoService));

        let core = AgentCore::new(make_worker(io_tx), busy.clone(), service_state.clone());
        runtime.spawn(event_loop::run(
            core,
            request_rx,
            io_rx,
            options.shutdown_timeout,
        ));

        Ok(Self {
            inner: Arc::new(AgentInner {
                requests: request_tx,
                busy,
                service_state,
            }),
        })
    }

    /// Queue one command
    pub fn run_command(&self, cmdline: impl Into<CommandLine>) -> CommandSession {
        self.run_command_sequence(vec![cmdline.into()], Interaction::None)
    }

    /// Queue one command with an interaction handler
    pub fn run_command_with(
        &self,
        cmdline: impl Into<CommandLine>,
        interaction: Interaction,
    ) -> CommandSession {
        self.run_command_sequence(vec![cmdline.into()], interaction)
    }

    /// Queue commands that run in order, stopping at the first failure
    ///
    /// Returns immediately; the session starts once every session queued
    /// before it finished.
    pub fn run_command_sequence(
        &self,
        cmdlines: Vec<CommandLine>,
        interaction: Interaction,
    ) -> CommandSession {
        let session = CommandSession::with_agent(cmdlines, self.inner.requests.downgrade());
        let core = SessionCore::new(session.clone(), interaction.into_handler());
        self.inner.busy.fetch_add(1, Ordering::SeqCst);
        if self.inner.requests.send(Request::Enqueue(core)).is_err() {
            log::warn!("command agent is gone, session {} not run", session.id());
            self.inner.busy.fetch_sub(1, Ordering::SeqCst);
            session.shared().publish_finished(-1);
        }
        session
    }

    /// Abort every queued and running session
    pub fn abort_commands(&self) {
        self.send(Request::AbortAll);
    }

    /// Whether any session is queued or running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst) > 0
    }

    /// Current service state of the worker
    #[must_use]
    pub fn service_state(&self) -> ServiceState {
        *self.inner.service_state.lock()
    }

    /// Whether a persistent service is up or on its way up or down
    #[must_use]
    pub fn is_service_running(&self) -> bool {
        self.service_state().is_service_running()
    }

    /// Stop the worker's service
    ///
    /// [`AgentEvent::ServiceStopped`] follows once it reached a stopped state.
    pub fn stop_service(&self) {
        self.send(Request::StopService);
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Request::Subscribe(tx));
        rx
    }

    /// [`CommandAgent::subscribe`] as a stream
    pub fn events(&self) -> impl Stream<Item = AgentEvent> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }
    }

    /// Abort all sessions, stop the service and wait for the control task
    ///
    /// Waits at most the configured shutdown timeout for the worker to stop.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.inner.requests.send(Request::Shutdown(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }

    fn send(&self, request: Request) {
        if self.inner.requests.send(request).is_err() {
            log::debug!("command agent is gone");
        }
    }
}

impl std::fmt::Debug for CommandAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAgent")
            .field("busy", &self.is_busy())
            .field("service_state", &self.service_state())
            .finish()
    }
}
