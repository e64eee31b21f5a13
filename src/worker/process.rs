//! One subprocess per command

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;

use crate::codec::{DefaultCodec, MessageCodec, RecordSplitter};
use crate::transport::{ChildHandle, InvocationBuilder, IoEvent, IoKind, Launcher};
use crate::types::{AgentOptions, CommandLine, ERROR_LABEL, ServiceState};

use super::{ServiceWorker, WorkerContext, WorkerEvent, route_record};

/// Input waiting for the dispatch phase
#[derive(Debug)]
enum Inbound {
    Record { data: Vec<u8>, stderr: bool },
    Exited(i32),
}

/// Worker spawning a fresh process for every command
///
/// There is no service to keep alive: the state is always
/// [`ServiceState::NoService`] and commands can be started at any time the
/// previous one has finished.
pub struct ProcessWorker<L> {
    launcher: L,
    program: PathBuf,
    options: Arc<AgentOptions>,
    codec: Arc<dyn MessageCodec>,
    child: Option<ChildHandle>,
    stdout: RecordSplitter,
    stderr: RecordSplitter,
    pending: VecDeque<Inbound>,
}

impl<L: Launcher> ProcessWorker<L> {
    /// Create a worker running `program`
    pub fn new(launcher: L, program: impl Into<PathBuf>, options: Arc<AgentOptions>) -> Self {
        Self {
            launcher,
            program: program.into(),
            options,
            codec: Arc::new(DefaultCodec),
            child: None,
            stdout: RecordSplitter::new(),
            stderr: RecordSplitter::new(),
            pending: VecDeque::new(),
        }
    }

    /// Replace the output codec
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    fn queue_records(&mut self, records: Vec<Vec<u8>>, stderr: bool) {
        self.pending
            .extend(records.into_iter().map(|data| Inbound::Record { data, stderr }));
    }

    fn route(&self, data: &[u8], stderr: bool, cx: &mut WorkerContext<'_>) {
        let (text, mut label) = match self.codec.unpack_message(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("undecodable output record: {e}");
                (String::from_utf8_lossy(data).into_owned(), String::new())
            }
        };
        if stderr && label.is_empty() {
            label = ERROR_LABEL.to_string();
        }
        route_record(self.codec.as_ref(), text, label, cx);
    }
}

impl<L: Launcher> ServiceWorker for ProcessWorker<L> {
    fn service_state(&self) -> ServiceState {
        ServiceState::NoService
    }

    fn start_service(&mut self, _cx: &mut WorkerContext<'_>) {}

    fn stop_service(&mut self, _cx: &mut WorkerContext<'_>) {}

    fn start_command(&mut self, cmdline: &CommandLine, cx: &mut WorkerContext<'_>) {
        if self.child.is_some() {
            log::warn!("refusing to start '{}' while a command is running", cmdline.display());
            return;
        }
        let invocation = InvocationBuilder::new(&self.program, &self.options).one_shot(cmdline);
        match self.launcher.launch(&invocation) {
            Ok(mut child) => {
                // One-shot commands never read input
                child.close_input();
                self.stdout = RecordSplitter::new();
                self.stderr = RecordSplitter::new();
                self.child = Some(child);
            }
            Err(e) => {
                log::error!("failed to start '{}': {e}", cmdline.display());
                cx.emit_error(e.to_string());
                cx.emit(WorkerEvent::CommandFinished(-1));
            }
        }
    }

    fn abort_command(&mut self) {
        if let Some(child) = self.child.as_mut() {
            log::debug!("interrupting child {}", child.generation());
            child.interrupt();
        }
    }

    fn is_command_running(&self) -> bool {
        self.child.is_some()
    }

    fn handle_io(&mut self, event: IoEvent, cx: &mut WorkerContext<'_>) {
        if self.child.as_ref().map(ChildHandle::generation) != Some(event.generation) {
            log::debug!("dropping output of stale child {}", event.generation);
            return;
        }
        match event.kind {
            IoKind::Stdout(data) => {
                let records = self.stdout.push(&data);
                self.queue_records(records, false);
            }
            IoKind::Stderr(data) => {
                let records = self.stderr.push(&data);
                self.queue_records(records, true);
            }
            IoKind::Exited(code) => {
                let rest_out = self.stdout.finish().into_iter().collect();
                self.queue_records(rest_out, false);
                let rest_err = self.stderr.finish().into_iter().collect();
                self.queue_records(rest_err, true);
                self.pending.push_back(Inbound::Exited(code));
            }
        }
        if !self.pending.is_empty() {
            cx.request_dispatch();
        }
    }

    fn dispatch(&mut self, cx: &mut WorkerContext<'_>) {
        while let Some(inbound) = self.pending.pop_front() {
            match inbound {
                Inbound::Record { data, stderr } => self.route(&data, stderr, cx),
                Inbound::Exited(code) => {
                    self.child = None;
                    cx.emit(WorkerEvent::CommandFinished(code));
                }
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, _cx: &mut WorkerContext<'_>) {}
}
