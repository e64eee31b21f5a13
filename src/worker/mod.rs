//! Service workers executing one command at a time
//!
//! A worker is driven exclusively by the agent's control task. Calls into a
//! worker never block: they write to the child's stdin, spawn processes
//! through a [`Launcher`](crate::transport::Launcher) or update state, and
//! report what happened by pushing [`WorkerEvent`]s into the
//! [`WorkerContext`] they were called with.
//!
//! Incoming bytes are handled in two phases. [`ServiceWorker::handle_io`]
//! only buffers and parses; if that produced work, the worker calls
//! [`WorkerContext::request_dispatch`] and the control task calls
//! [`ServiceWorker::dispatch`] on a later turn, which is where interaction
//! handlers run.

mod process;
mod server;

use std::collections::VecDeque;

pub use process::ProcessWorker;
pub use server::ServerWorker;

use tokio::time::Instant;

use crate::codec::MessageCodec;
use crate::interaction::{InteractionHandler, PromptMode};
use crate::transport::{IoEvent, Launcher};
use crate::types::{CommandLine, Labels, OutputRecord, ProgressRecord, ServiceState};

/// Notification from a worker to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The service state changed
    ServiceStateChanged(ServiceState),
    /// The running command ended with the given exit code
    CommandFinished(i32),
    /// An output record the handler did not consume
    Output(OutputRecord),
    /// A progress update
    Progress(ProgressRecord),
}

/// Per-call environment of a worker
///
/// Carries the interaction handler of the command being served and collects
/// the events the call produces.
pub struct WorkerContext<'a> {
    handler: &'a mut dyn InteractionHandler,
    events: &'a mut VecDeque<WorkerEvent>,
    dispatch_requested: bool,
}

impl<'a> WorkerContext<'a> {
    /// Create a context
    pub fn new(
        handler: &'a mut dyn InteractionHandler,
        events: &'a mut VecDeque<WorkerEvent>,
    ) -> Self {
        Self {
            handler,
            events,
            dispatch_requested: false,
        }
    }

    /// Interaction handler of the current command
    pub fn handler(&mut self) -> &mut (dyn InteractionHandler + 'a) {
        &mut *self.handler
    }

    /// Queue an event
    pub fn emit(&mut self, event: WorkerEvent) {
        self.events.push_back(event);
    }

    /// Queue a `ui.error` output record
    pub fn emit_error(&mut self, text: impl Into<String>) {
        let mut text = text.into();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.emit(WorkerEvent::Output(OutputRecord::error(text)));
    }

    /// Ask for a [`ServiceWorker::dispatch`] call on the next turn
    pub fn request_dispatch(&mut self) {
        self.dispatch_requested = true;
    }

    /// Whether a dispatch was requested during this call
    #[must_use]
    pub const fn dispatch_requested(&self) -> bool {
        self.dispatch_requested
    }
}

/// Worker capability set
pub trait ServiceWorker: Send {
    /// Current service state
    fn service_state(&self) -> ServiceState;

    /// Bring the service up; no-op for stateless workers
    fn start_service(&mut self, cx: &mut WorkerContext<'_>);

    /// Tear the service down; no-op for stateless workers
    fn stop_service(&mut self, cx: &mut WorkerContext<'_>);

    /// Start `cmdline`; only valid when the state allows running commands
    fn start_command(&mut self, cmdline: &CommandLine, cx: &mut WorkerContext<'_>);

    /// Interrupt the running command, if any
    fn abort_command(&mut self);

    /// Whether a command is in flight
    fn is_command_running(&self) -> bool;

    /// Phase one of input handling: buffer and parse
    fn handle_io(&mut self, event: IoEvent, cx: &mut WorkerContext<'_>);

    /// Phase two of input handling: act on parsed input
    fn dispatch(&mut self, cx: &mut WorkerContext<'_>);

    /// When [`ServiceWorker::handle_timeout`] is due, if ever
    fn deadline(&self) -> Option<Instant>;

    /// The deadline passed
    fn handle_timeout(&mut self, cx: &mut WorkerContext<'_>);
}

/// The worker kinds an agent can drive
pub enum Worker<L> {
    /// One subprocess per command
    Process(ProcessWorker<L>),
    /// Persistent command server
    Server(ServerWorker<L>),
}

macro_rules! delegate {
    ($self:ident, $w:ident => $call:expr) => {
        match $self {
            Worker::Process($w) => $call,
            Worker::Server($w) => $call,
        }
    };
}

impl<L: Launcher> ServiceWorker for Worker<L> {
    fn service_state(&self) -> ServiceState {
        delegate!(self, w => w.service_state())
    }

    fn start_service(&mut self, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.start_service(cx));
    }

    fn stop_service(&mut self, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.stop_service(cx));
    }

    fn start_command(&mut self, cmdline: &CommandLine, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.start_command(cmdline, cx));
    }

    fn abort_command(&mut self) {
        delegate!(self, w => w.abort_command());
    }

    fn is_command_running(&self) -> bool {
        delegate!(self, w => w.is_command_running())
    }

    fn handle_io(&mut self, event: IoEvent, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.handle_io(event, cx));
    }

    fn dispatch(&mut self, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.dispatch(cx));
    }

    fn deadline(&self) -> Option<Instant> {
        delegate!(self, w => w.deadline())
    }

    fn handle_timeout(&mut self, cx: &mut WorkerContext<'_>) {
        delegate!(self, w => w.handle_timeout(cx));
    }
}

/// Route one decoded `(text, label)` record
///
/// Progress records become progress events, prompts go to the handler, and
/// everything else is offered to the handler for capture before being
/// emitted as output.
pub(crate) fn route_record(
    codec: &dyn MessageCodec,
    text: String,
    label: String,
    cx: &mut WorkerContext<'_>,
) {
    let labels = Labels::parse(&label);
    if labels.contains(Labels::PROGRESS) {
        match codec.unpack_progress(&text) {
            Ok(progress) => cx.emit(WorkerEvent::Progress(progress)),
            Err(e) => log::warn!("dropping malformed progress record: {e}"),
        }
    } else if labels.contains(Labels::PROMPT) {
        cx.handler()
            .set_prompt(&text, PromptMode::from_labels(labels), "");
    } else if cx.handler().write_output(&text, &label).is_none() {
        cx.emit(WorkerEvent::Output(OutputRecord::new(text, label)));
    }
}

