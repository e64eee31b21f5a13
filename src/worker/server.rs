//! Persistent command server worker
//!
//! State transitions:
//!
//! ```text
//! NotRunning --start--> Starting --hello--> Ready
//! Starting/Ready --stop--> Stopping --exit--> NotRunning
//! Stopping --start--> Restarting --exit--> Starting
//! Restarting --stop--> Stopping
//! Stopping/Restarting --read timeout--> child killed, exit as above
//! any other exit --> NotRunning (reported as a crash)
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::Instant;
use tokio_util::codec::Decoder;

use crate::codec::{DefaultCodec, MessageCodec};
use crate::error::CommandError;
use crate::protocol::{
    Channel, ChannelDecoder, Frame, Hello, encode_block, encode_line_reply, encode_runcommand,
};
use crate::transport::{ChildHandle, InvocationBuilder, IoEvent, IoKind, Launcher};
use crate::types::{AgentOptions, CommandLine, ERROR_LABEL, OutputRecord, ServiceState};

use super::{ServiceWorker, WorkerContext, WorkerEvent, route_record};

/// Parsed input waiting for the dispatch phase
#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Exited(i32),
}

/// Worker keeping one command server process alive across commands
pub struct ServerWorker<L> {
    launcher: L,
    program: PathBuf,
    options: Arc<AgentOptions>,
    codec: Arc<dyn MessageCodec>,
    read_timeout: Duration,
    state: ServiceState,
    child: Option<ChildHandle>,
    read_buf: BytesMut,
    decoder: ChannelDecoder,
    pending: VecDeque<Inbound>,
    hello: Option<Hello>,
    command_running: bool,
    deadline: Option<Instant>,
}

impl<L: Launcher> ServerWorker<L> {
    /// Create a stopped worker serving through `program`
    pub fn new(launcher: L, program: impl Into<PathBuf>, options: Arc<AgentOptions>) -> Self {
        Self {
            launcher,
            program: program.into(),
            read_timeout: options.read_timeout,
            options,
            codec: Arc::new(DefaultCodec),
            state: ServiceState::NotRunning,
            child: None,
            read_buf: BytesMut::new(),
            decoder: ChannelDecoder,
            pending: VecDeque::new(),
            hello: None,
            command_running: false,
            deadline: None,
        }
    }

    /// Replace the output codec
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Hello block of the running server, once the handshake completed
    #[must_use]
    pub const fn hello(&self) -> Option<&Hello> {
        self.hello.as_ref()
    }

    fn set_state(&mut self, state: ServiceState, cx: &mut WorkerContext<'_>) {
        if self.state != state {
            log::debug!("command server: {} -> {}", self.state, state);
            self.state = state;
            cx.emit(WorkerEvent::ServiceStateChanged(state));
        }
    }

    fn arm_timer(&mut self) {
        self.deadline = Some(Instant::now() + self.read_timeout);
    }

    fn spawn(&mut self, cx: &mut WorkerContext<'_>) {
        let invocation = InvocationBuilder::new(&self.program, &self.options).command_server();
        match self.launcher.launch(&invocation) {
            Ok(child) => {
                log::info!("command server started (child {})", child.generation());
                self.child = Some(child);
                self.read_buf.clear();
                self.pending.clear();
                self.hello = None;
                self.set_state(ServiceState::Starting, cx);
                self.arm_timer();
            }
            Err(e) => {
                log::error!("failed to start command server: {e}");
                cx.emit_error(e.to_string());
                self.set_state(ServiceState::NotRunning, cx);
            }
        }
    }

    /// Report a fatal protocol violation and tear the connection down
    fn protocol_error(&mut self, err: &CommandError, cx: &mut WorkerContext<'_>) {
        log::error!("command server: {err}");
        cx.emit_error(format!("command server: {err}"));
        self.stop_service(cx);
    }

    fn handle_exit(&mut self, code: i32, cx: &mut WorkerContext<'_>) {
        self.child = None;
        self.read_buf.clear();
        self.hello = None;
        self.command_running = false;
        self.deadline = None;
        match self.state {
            ServiceState::Restarting => {
                log::info!("command server exited ({code}), restarting");
                self.spawn(cx);
            }
            ServiceState::Stopping => {
                log::info!("command server stopped ({code})");
                self.set_state(ServiceState::NotRunning, cx);
            }
            _ => {
                log::error!("command server exited unexpectedly with code {code}");
                cx.emit_error(format!("command server exited unexpectedly with code {code}"));
                self.set_state(ServiceState::NotRunning, cx);
            }
        }
    }

    fn handle_hello(&mut self, frame: Frame, cx: &mut WorkerContext<'_>) {
        let payload = match frame {
            Frame::Data {
                channel: Channel::Output,
                payload,
            } => payload,
            other => {
                let err = CommandError::protocol(format!("expected hello block, got {other:?}"));
                self.protocol_error(&err, cx);
                return;
            }
        };
        match Hello::parse(&payload) {
            Ok(hello) => {
                log::debug!("command server hello: {:?}", hello.fields);
                self.hello = Some(hello);
                if self.read_buf.is_empty() {
                    self.deadline = None;
                }
                self.set_state(ServiceState::Ready, cx);
            }
            Err(e) => self.protocol_error(&e, cx),
        }
    }

    fn dispatch_frame(&mut self, frame: Frame, cx: &mut WorkerContext<'_>) {
        match frame {
            Frame::Data {
                channel: Channel::Output,
                payload,
            } => self.route(&payload, "", cx),
            Frame::Data {
                channel: Channel::Error,
                payload,
            } => self.route(&payload, ERROR_LABEL, cx),
            Frame::Data {
                channel: Channel::Result,
                payload,
            } => {
                let Ok(raw) = <[u8; 4]>::try_from(payload.as_ref()) else {
                    let err = CommandError::protocol(format!(
                        "corrupted result frame of {} bytes",
                        payload.len()
                    ));
                    self.protocol_error(&err, cx);
                    return;
                };
                let code = i32::from_be_bytes(raw);
                if !self.command_running {
                    log::warn!("command server sent a result without a running command");
                }
                self.command_running = false;
                cx.emit(WorkerEvent::CommandFinished(code));
            }
            Frame::Data {
                channel: Channel::Debug,
                payload,
            } => log::debug!("command server debug: {}", String::from_utf8_lossy(&payload)),
            Frame::Data { channel, .. } if !channel.is_required() => {
                log::debug!("ignoring optional channel '{}'", channel.as_byte().escape_ascii());
            }
            Frame::InputRequest {
                channel: Channel::LineInput,
                size,
            } => self.answer_line_input(size, cx),
            Frame::InputRequest {
                channel: Channel::DataInput,
                ..
            } => {
                log::warn!("raw data input is not supported, sending EOF");
                self.write(&encode_block(b""), cx);
            }
            Frame::Data { channel, .. } | Frame::InputRequest { channel, .. } => {
                let err = CommandError::protocol(format!(
                    "unexpected data on required channel '{}'",
                    channel.as_byte().escape_ascii()
                ));
                self.protocol_error(&err, cx);
            }
        }
    }

    fn route(&self, payload: &[u8], default_label: &str, cx: &mut WorkerContext<'_>) {
        let (text, mut label) = match self.codec.unpack_message(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("undecodable output record: {e}");
                (String::from_utf8_lossy(payload).into_owned(), String::new())
            }
        };
        if label.is_empty() {
            label = default_label.to_string();
        }
        route_record(self.codec.as_ref(), text, label, cx);
    }

    fn answer_line_input(&mut self, size: usize, cx: &mut WorkerContext<'_>) {
        let answer = cx.handler().get_line_input();
        match encode_line_reply(answer.as_deref(), size) {
            Ok(blocks) => {
                for block in blocks {
                    self.write(&block, cx);
                }
            }
            Err(e) => {
                log::warn!("cannot send line input: {e}");
                cx.emit_error(e.to_string());
                self.write(&encode_block(b""), cx);
            }
        }
    }

    fn write(&self, data: &[u8], cx: &mut WorkerContext<'_>) {
        let result = match &self.child {
            Some(child) => child.write(data.to_vec()),
            None => Err(CommandError::invalid_state("command server is not running")),
        };
        if let Err(e) = result {
            log::warn!("write to command server failed: {e}");
            cx.emit_error(format!("write to command server failed: {e}"));
        }
    }
}

impl<L: Launcher> ServiceWorker for ServerWorker<L> {
    fn service_state(&self) -> ServiceState {
        self.state
    }

    fn start_service(&mut self, cx: &mut WorkerContext<'_>) {
        match self.state {
            ServiceState::NotRunning => self.spawn(cx),
            ServiceState::Stopping => self.set_state(ServiceState::Restarting, cx),
            _ => {}
        }
    }

    fn stop_service(&mut self, cx: &mut WorkerContext<'_>) {
        match self.state {
            ServiceState::Starting | ServiceState::Ready => {
                // A server ignoring the interrupt is killed when this expires
                self.arm_timer();
                self.read_buf.clear();
                // Frames of this server are void now, its exit still counts
                self.pending.retain(|inbound| matches!(inbound, Inbound::Exited(_)));
                if let Some(child) = self.child.as_mut() {
                    child.interrupt();
                    child.close_input();
                }
                self.set_state(ServiceState::Stopping, cx);
            }
            ServiceState::Restarting => self.set_state(ServiceState::Stopping, cx),
            _ => {}
        }
    }

    fn start_command(&mut self, cmdline: &CommandLine, cx: &mut WorkerContext<'_>) {
        if self.state != ServiceState::Ready || self.command_running {
            log::warn!(
                "cannot start '{}': command server is {}",
                cmdline.display(),
                self.state
            );
            cx.emit_error(format!("command server is not ready ({})", self.state));
            cx.emit(WorkerEvent::CommandFinished(-1));
            return;
        }
        let request = match encode_runcommand(cmdline) {
            Ok(request) => request,
            Err(e) => {
                cx.emit_error(e.to_string());
                cx.emit(WorkerEvent::CommandFinished(-1));
                return;
            }
        };
        log::debug!("runcommand {}", cmdline.display());
        let sent = self
            .child
            .as_ref()
            .map(|child| child.write(request))
            .unwrap_or_else(|| Err(CommandError::invalid_state("command server is not running")));
        match sent {
            Ok(()) => self.command_running = true,
            Err(e) => {
                cx.emit_error(format!("write to command server failed: {e}"));
                cx.emit(WorkerEvent::CommandFinished(-1));
            }
        }
    }

    fn abort_command(&mut self) {
        if self.command_running
            && let Some(child) = self.child.as_mut()
        {
            log::debug!("interrupting command server child {}", child.generation());
            child.interrupt();
        }
    }

    fn is_command_running(&self) -> bool {
        self.command_running
    }

    fn handle_io(&mut self, event: IoEvent, cx: &mut WorkerContext<'_>) {
        if self.child.as_ref().map(ChildHandle::generation) != Some(event.generation) {
            log::debug!("dropping input of stale child {}", event.generation);
            return;
        }
        match event.kind {
            IoKind::Stdout(data) => {
                if !matches!(self.state, ServiceState::Starting | ServiceState::Ready) {
                    return;
                }
                self.read_buf.extend_from_slice(&data);
                loop {
                    match self.decoder.decode(&mut self.read_buf) {
                        Ok(Some(frame)) => self.pending.push_back(Inbound::Frame(frame)),
                        Ok(None) => break,
                        Err(e) => {
                            self.protocol_error(&e, cx);
                            return;
                        }
                    }
                }
                if !self.read_buf.is_empty() || self.state == ServiceState::Starting {
                    self.arm_timer();
                } else {
                    self.deadline = None;
                }
            }
            IoKind::Stderr(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                cx.emit(WorkerEvent::Output(OutputRecord::error(text)));
            }
            IoKind::Exited(code) => self.pending.push_back(Inbound::Exited(code)),
        }
        if !self.pending.is_empty() {
            cx.request_dispatch();
        }
    }

    fn dispatch(&mut self, cx: &mut WorkerContext<'_>) {
        while let Some(inbound) = self.pending.pop_front() {
            match inbound {
                Inbound::Exited(code) => self.handle_exit(code, cx),
                Inbound::Frame(frame) => match self.state {
                    ServiceState::Starting => self.handle_hello(frame, cx),
                    ServiceState::Ready => self.dispatch_frame(frame, cx),
                    _ => log::debug!("dropping frame after teardown: {frame:?}"),
                },
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn handle_timeout(&mut self, cx: &mut WorkerContext<'_>) {
        self.deadline = None;
        if matches!(self.state, ServiceState::Stopping | ServiceState::Restarting) {
            if let Some(child) = self.child.as_mut() {
                log::warn!(
                    "command server child {} did not stop within {:?}, killing it",
                    child.generation(),
                    self.read_timeout
                );
                child.kill();
            }
            return;
        }
        let err = if self.state == ServiceState::Starting && self.read_buf.is_empty() {
            CommandError::protocol("no hello from command server")
        } else if self.read_buf.is_empty() {
            return;
        } else {
            CommandError::protocol(format!(
                "incomplete frame from command server ({} bytes buffered)",
                self.read_buf.len()
            ))
        };
        self.protocol_error(&err, cx);
    }
}
