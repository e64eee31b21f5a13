//! Tests for `CommandAgent` scheduling and session sequencing
//!
//! A scripted worker answers commands through the agent's I/O channel, so
//! every reply takes the same path through the control task as real child
//! output. The last tests run the real `ServerWorker` over in-memory
//! children instead.

#[path = "../common/mod.rs"]
mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::{FakeLauncher, HELLO, ScriptedHandler, frame, input_request, result_frame};
use hgcmd::codec::{DefaultCodec, MessageCodec};
use hgcmd::protocol::{encode_line_reply, encode_runcommand};
use hgcmd::session::TERMINATED_BY_USER;
use hgcmd::transport::{IoEvent, IoKind, IoSender};
use hgcmd::worker::{ServerWorker, ServiceWorker, WorkerContext, WorkerEvent};
use hgcmd::{
    AgentEvent, AgentOptions, CommandAgent, CommandLine, CommandSession, Interaction,
    OutputRecord, ServiceState,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

const GENERATION: u64 = 1;
const HELLO_MARKER: &str = "hello";

/// How the scripted worker answers a command
#[derive(Debug, Clone)]
enum Reply {
    Finish(Vec<OutputRecord>, i32),
    /// Runs until aborted
    Hang,
    /// Runs forever, ignoring aborts
    Wedged,
}

struct ScriptedWorker {
    io: IoSender,
    script: HashMap<String, Reply>,
    dispatched: Arc<Mutex<Vec<CommandLine>>>,
    persistent: bool,
    state: ServiceState,
    running: bool,
    wedged: bool,
    pending: VecDeque<IoKind>,
}

impl ScriptedWorker {
    fn send(&self, kind: IoKind) {
        let _ = self.io.send(IoEvent::new(GENERATION, kind));
    }

    fn send_record(&self, text: &str, label: &str) {
        let data = DefaultCodec.pack_message(text, label);
        self.send(IoKind::Stdout(Bytes::from(data)));
    }

    fn set_state(&mut self, state: ServiceState, cx: &mut WorkerContext<'_>) {
        self.state = state;
        cx.emit(WorkerEvent::ServiceStateChanged(state));
    }
}

impl ServiceWorker for ScriptedWorker {
    fn service_state(&self) -> ServiceState {
        self.state
    }

    fn start_service(&mut self, cx: &mut WorkerContext<'_>) {
        if self.persistent && self.state == ServiceState::NotRunning {
            self.set_state(ServiceState::Starting, cx);
            self.send_record(HELLO_MARKER, "");
        }
    }

    fn stop_service(&mut self, cx: &mut WorkerContext<'_>) {
        if matches!(self.state, ServiceState::Starting | ServiceState::Ready) {
            self.set_state(ServiceState::Stopping, cx);
            self.send(IoKind::Exited(0));
        }
    }

    fn start_command(&mut self, cmdline: &CommandLine, _cx: &mut WorkerContext<'_>) {
        self.dispatched.lock().unwrap().push(cmdline.clone());
        self.running = true;
        let name = cmdline.command_name().unwrap_or_default().to_string();
        match self.script.get(&name).cloned() {
            Some(Reply::Finish(records, code)) => {
                for record in records {
                    self.send_record(&record.text, &record.label);
                }
                self.send(IoKind::Exited(code));
            }
            Some(Reply::Hang) => {}
            Some(Reply::Wedged) => self.wedged = true,
            None => {
                self.send_record(&format!("hg: unknown command '{name}'\n"), "ui.error");
                self.send(IoKind::Exited(255));
            }
        }
    }

    fn abort_command(&mut self) {
        if self.running && !self.wedged {
            self.send(IoKind::Exited(-2));
        }
    }

    fn is_command_running(&self) -> bool {
        self.running
    }

    fn handle_io(&mut self, event: IoEvent, cx: &mut WorkerContext<'_>) {
        if event.generation == GENERATION {
            self.pending.push_back(event.kind);
            cx.request_dispatch();
        }
    }

    fn dispatch(&mut self, cx: &mut WorkerContext<'_>) {
        while let Some(kind) = self.pending.pop_front() {
            match kind {
                IoKind::Stdout(data) => {
                    let (text, label) = DefaultCodec.unpack_message(&data).unwrap();
                    if self.state == ServiceState::Starting && text == HELLO_MARKER {
                        self.set_state(ServiceState::Ready, cx);
                    } else if cx.handler().write_output(&text, &label).is_none() {
                        cx.emit(WorkerEvent::Output(OutputRecord::new(text, label)));
                    }
                }
                IoKind::Stderr(_) => {}
                IoKind::Exited(code) => {
                    if self.state == ServiceState::Stopping {
                        self.running = false;
                        self.set_state(ServiceState::NotRunning, cx);
                    } else if self.running {
                        self.running = false;
                        cx.emit(WorkerEvent::CommandFinished(code));
                    }
                }
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn handle_timeout(&mut self, _cx: &mut WorkerContext<'_>) {}
}

struct Fixture {
    agent: CommandAgent,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    dispatched: Arc<Mutex<Vec<CommandLine>>>,
}

impl Fixture {
    fn new(persistent: bool, script: &[(&str, Reply)]) -> Self {
        Self::with_shutdown_timeout(persistent, script, Duration::from_secs(2))
    }

    fn with_shutdown_timeout(
        persistent: bool,
        script: &[(&str, Reply)],
        shutdown_timeout: Duration,
    ) -> Self {
        common::init_logging();
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let script: HashMap<String, Reply> = script
            .iter()
            .map(|(name, reply)| ((*name).to_string(), reply.clone()))
            .collect();
        let worker_dispatched = dispatched.clone();
        let options = AgentOptions::builder()
            .shutdown_timeout(shutdown_timeout)
            .build();
        let agent = CommandAgent::spawn_with(&options, move |io| ScriptedWorker {
            io,
            script,
            dispatched: worker_dispatched,
            persistent,
            state: if persistent {
                ServiceState::NotRunning
            } else {
                ServiceState::NoService
            },
            running: false,
            wedged: false,
            pending: VecDeque::new(),
        })
        .unwrap();
        let events = agent.subscribe();
        Self {
            agent,
            events,
            dispatched,
        }
    }

    /// An agent around a real `ServerWorker`; child I/O is fed through the
    /// returned sender
    fn server(launcher: &FakeLauncher) -> (Self, IoSender) {
        common::init_logging();
        let options = AgentOptions::builder()
            .shutdown_timeout(Duration::from_secs(2))
            .build();
        let worker_options = Arc::new(options.clone());
        let mut io_tx = None;
        let agent = CommandAgent::spawn_with(&options, |io| {
            io_tx = Some(io);
            ServerWorker::new(launcher.clone(), "/usr/bin/hg", worker_options)
        })
        .unwrap();
        let events = agent.subscribe();
        let fixture = Self {
            agent,
            events,
            dispatched: Arc::new(Mutex::new(Vec::new())),
        };
        (fixture, io_tx.unwrap())
    }

    async fn until_state(&mut self, state: ServiceState) {
        while self.next_event().await != AgentEvent::ServiceStateChanged(state) {}
    }

    fn dispatched(&self) -> Vec<CommandLine> {
        self.dispatched.lock().unwrap().clone()
    }

    async fn next_event(&mut self) -> AgentEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for an agent event")
            .expect("agent event channel closed")
    }

    /// Collect events up to and including the `CommandFinished` of `session`
    async fn until_finished(&mut self, session: &CommandSession) -> Vec<AgentEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches!(&event, AgentEvent::CommandFinished(s) if s == session);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    /// Wait until the control message announcing `cmdline` was published
    async fn until_started(&mut self, cmdline: &str) {
        let banner = format!("% hg {cmdline}");
        loop {
            if let AgentEvent::ControlMessage(text) = self.next_event().await
                && text == banner
            {
                return;
            }
        }
    }
}

fn finish(records: &[(&str, &str)], code: i32) -> Reply {
    Reply::Finish(
        records
            .iter()
            .map(|(text, label)| OutputRecord::new(*text, *label))
            .collect(),
        code,
    )
}

fn outputs_with_text<'a>(events: &'a [AgentEvent], wanted: &str) -> Vec<&'a AgentEvent> {
    events
        .iter()
        .filter(|e| matches!(e, AgentEvent::OutputReceived { text, .. } if text == wanted))
        .collect()
}

fn finished_count(events: &[AgentEvent], session: &CommandSession) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AgentEvent::CommandFinished(s) if s == session))
        .count()
}

#[tokio::test]
async fn status_succeeds_with_one_output_line() {
    let mut fx = Fixture::new(false, &[("status", finish(&[("M a.txt\n", "ui.status")], 0))]);

    let session = fx.agent.run_command(["status"]);
    let events = fx.until_finished(&session).await;

    assert!(session.is_finished());
    assert!(!session.is_aborted());
    assert_eq!(session.exit_code(), 0);
    assert_eq!(session.error_string(), "");
    assert_eq!(
        outputs_with_text(&events, "M a.txt\n"),
        vec![&AgentEvent::OutputReceived {
            text: "M a.txt\n".into(),
            label: "ui.status".into(),
        }]
    );
    assert_eq!(finished_count(&events, &session), 1);
}

#[tokio::test]
async fn control_lines_frame_each_command() {
    let mut fx = Fixture::new(false, &[("status", finish(&[], 0))]);

    let session = fx.agent.run_command(["status"]);
    let events = fx.until_finished(&session).await;

    let controls: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ControlMessage(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(controls.len(), 2);
    assert_eq!(controls[0], "% hg status");
    assert!(controls[1].starts_with("[command completed successfully"));

    let merged = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::OutputReceived { label, .. } if label == "control"))
        .count();
    assert_eq!(merged, 2);
}

#[tokio::test]
async fn sequence_stops_on_first_failure() {
    let mut fx = Fixture::new(
        false,
        &[
            ("pull", finish(&[("abort: repository default not found\n", "ui.error")], 1)),
            ("update", finish(&[], 0)),
        ],
    );

    let session = fx.agent.run_command_sequence(
        vec![CommandLine::from(["pull"]), CommandLine::from(["update"])],
        Interaction::None,
    );
    let events = fx.until_finished(&session).await;

    assert_eq!(session.exit_code(), 1);
    assert_eq!(session.error_string(), "abort: repository default not found");
    assert_eq!(fx.dispatched(), vec![CommandLine::from(["pull"])]);
    assert_eq!(finished_count(&events, &session), 1);
}

#[tokio::test]
async fn sequence_runs_every_command_on_success() {
    let mut fx = Fixture::new(
        false,
        &[
            ("pull", finish(&[("warning: certificate not verified\n", "ui.warning")], 0)),
            ("update", finish(&[], 0)),
        ],
    );

    let session = fx.agent.run_command_sequence(
        vec![CommandLine::from(["pull"]), CommandLine::from(["update", "-C"])],
        Interaction::None,
    );
    fx.until_finished(&session).await;

    assert_eq!(session.exit_code(), 0);
    assert_eq!(session.warning_string(), "warning: certificate not verified");
    assert_eq!(
        fx.dispatched(),
        vec![CommandLine::from(["pull"]), CommandLine::from(["update", "-C"])]
    );
}

#[tokio::test]
async fn captured_output_is_not_emitted() {
    let mut fx = Fixture::new(
        false,
        &[("cat", finish(&[("a\n", ""), ("b\n", ""), ("note\n", "ui.status")], 0))],
    );

    let session = fx.agent.run_command(["cat", "-r", "tip", "a.txt"]);
    session.set_capture_output(true).unwrap();
    let events = fx.until_finished(&session).await;

    assert_eq!(session.read_all(), b"a\nb\n".to_vec());
    assert!(outputs_with_text(&events, "a\n").is_empty());
    assert!(outputs_with_text(&events, "b\n").is_empty());
    assert_eq!(outputs_with_text(&events, "note\n").len(), 1);
}

#[tokio::test]
async fn capture_cannot_change_after_start() {
    let mut fx = Fixture::new(false, &[("status", finish(&[], 0))]);

    let session = fx.agent.run_command(["status"]);
    fx.until_finished(&session).await;

    assert!(session.set_capture_output(true).is_err());
    assert!(!session.capture_output());
}

#[tokio::test]
async fn abort_before_run() {
    let mut fx = Fixture::new(false, &[("status", finish(&[], 0))]);

    let session = fx.agent.run_command(["status"]);
    session.abort();
    let events = fx.until_finished(&session).await;

    assert!(session.is_finished());
    assert!(session.is_aborted());
    assert_eq!(session.exit_code(), -1);
    assert_eq!(session.error_string(), TERMINATED_BY_USER);
    assert!(fx.dispatched().is_empty());
    assert_eq!(finished_count(&events, &session), 1);
}

#[tokio::test]
async fn abort_running_command() {
    let mut fx = Fixture::new(false, &[("serve", Reply::Hang)]);

    let session = fx.agent.run_command_sequence(
        vec![CommandLine::from(["serve"]), CommandLine::from(["status"])],
        Interaction::None,
    );
    fx.until_started("serve").await;
    assert!(session.is_running());

    session.abort();
    let events = fx.until_finished(&session).await;

    assert!(session.is_aborted());
    assert_ne!(session.exit_code(), 0);
    assert_eq!(fx.dispatched(), vec![CommandLine::from(["serve"])]);
    assert_eq!(finished_count(&events, &session), 1);
}

#[tokio::test]
async fn sessions_run_in_fifo_order() {
    let mut fx = Fixture::new(
        false,
        &[("incoming", Reply::Hang), ("status", finish(&[], 0))],
    );

    let first = fx.agent.run_command(["incoming"]);
    let second = fx.agent.run_command(["status"]);
    fx.until_started("incoming").await;
    assert_eq!(fx.dispatched(), vec![CommandLine::from(["incoming"])]);
    assert!(!second.is_running());

    first.abort();
    let events = fx.until_finished(&second).await;

    assert!(first.is_finished());
    let order: Vec<&CommandSession> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::CommandFinished(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![&first, &second]);
    assert_eq!(
        fx.dispatched(),
        vec![CommandLine::from(["incoming"]), CommandLine::from(["status"])]
    );
}

#[tokio::test]
async fn waiting_session_leaves_queue_on_abort() {
    let mut fx = Fixture::new(
        false,
        &[("incoming", Reply::Hang), ("status", finish(&[], 0))],
    );

    let running = fx.agent.run_command(["incoming"]);
    let waiting = fx.agent.run_command(["outgoing"]);
    let last = fx.agent.run_command(["status"]);
    fx.until_started("incoming").await;

    waiting.abort();
    fx.until_finished(&waiting).await;
    assert!(waiting.is_aborted());
    assert_eq!(waiting.exit_code(), -1);
    assert!(running.is_running());
    assert!(fx.agent.is_busy());

    running.abort();
    fx.until_finished(&last).await;
    assert_eq!(last.exit_code(), 0);
    assert_eq!(
        fx.dispatched(),
        vec![CommandLine::from(["incoming"]), CommandLine::from(["status"])]
    );
}

#[tokio::test]
async fn abort_commands_clears_queue() {
    let mut fx = Fixture::new(false, &[("incoming", Reply::Hang)]);

    let first = fx.agent.run_command(["incoming"]);
    let second = fx.agent.run_command(["status"]);
    fx.until_started("incoming").await;

    fx.agent.abort_commands();
    fx.until_finished(&first).await;
    second.wait().await;

    assert!(first.is_aborted());
    assert!(second.is_aborted());
    assert_eq!(fx.dispatched(), vec![CommandLine::from(["incoming"])]);
}

#[tokio::test]
async fn busy_follows_queue() {
    let mut fx = Fixture::new(false, &[("status", finish(&[], 0))]);
    assert!(!fx.agent.is_busy());

    let session = fx.agent.run_command(["status"]);
    assert!(fx.agent.is_busy());

    let mut events = fx.until_finished(&session).await;
    assert_eq!(events.first(), Some(&AgentEvent::BusyChanged(true)));
    events.push(fx.next_event().await);
    assert_eq!(events.last(), Some(&AgentEvent::BusyChanged(false)));
    assert!(!fx.agent.is_busy());
}

#[tokio::test]
async fn server_starts_on_demand_and_stops_on_request() {
    let mut fx = Fixture::new(true, &[("status", finish(&[("ok\n", "")], 0))]);
    assert_eq!(fx.agent.service_state(), ServiceState::NotRunning);
    assert!(!fx.agent.is_service_running());

    let session = fx.agent.run_command(["status"]);
    let events = fx.until_finished(&session).await;
    assert_eq!(session.exit_code(), 0);

    let states: Vec<ServiceState> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ServiceStateChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![ServiceState::Starting, ServiceState::Ready]);

    // Queue drained, service stays up
    assert_eq!(fx.agent.service_state(), ServiceState::Ready);
    assert!(fx.agent.is_service_running());

    fx.agent.stop_service();
    loop {
        if fx.next_event().await == AgentEvent::ServiceStopped {
            break;
        }
    }
    assert_eq!(fx.agent.service_state(), ServiceState::NotRunning);
}

#[tokio::test]
async fn stop_service_when_stopped_still_reports() {
    let mut fx = Fixture::new(false, &[]);
    fx.agent.stop_service();
    assert_eq!(fx.next_event().await, AgentEvent::ServiceStopped);
}

#[tokio::test]
async fn shutdown_aborts_running_session() {
    let mut fx = Fixture::new(true, &[("serve", Reply::Hang)]);

    let session = fx.agent.run_command(["serve"]);
    fx.until_started("serve").await;

    fx.agent.shutdown().await;

    assert!(session.is_finished());
    assert!(session.is_aborted());
    assert!(!fx.agent.is_busy());
    assert_eq!(fx.agent.service_state(), ServiceState::NotRunning);

    // Sessions queued after shutdown finish right away
    let late = fx.agent.run_command(["status"]);
    late.wait().await;
    assert_eq!(late.exit_code(), -1);
}

#[tokio::test]
async fn shutdown_timeout_finishes_wedged_session() {
    let mut fx = Fixture::with_shutdown_timeout(
        false,
        &[("serve", Reply::Wedged)],
        Duration::from_millis(200),
    );

    let session = fx.agent.run_command(["serve"]);
    fx.until_started("serve").await;
    fx.agent.shutdown().await;

    assert!(session.is_finished());
    assert_eq!(session.exit_code(), -1);
    assert!(!fx.agent.is_busy());

    let mut rest = Vec::new();
    while let Ok(event) = fx.events.try_recv() {
        rest.push(event);
    }
    assert_eq!(finished_count(&rest, &session), 1);
    assert_eq!(rest.last(), Some(&AgentEvent::BusyChanged(false)));
}

#[tokio::test]
async fn unknown_command_fails() {
    let mut fx = Fixture::new(false, &[]);
    let session = fx.agent.run_command(["frobnicate"]);
    fx.until_finished(&session).await;
    assert_eq!(session.exit_code(), 255);
    assert_eq!(session.error_string(), "hg: unknown command 'frobnicate'");
}

#[test]
fn spawn_requires_runtime() {
    let result = CommandAgent::spawn_with(&AgentOptions::default(), |io| ScriptedWorker {
        io,
        script: HashMap::new(),
        dispatched: Arc::default(),
        persistent: false,
        state: ServiceState::NoService,
        running: false,
        pending: VecDeque::new(),
        wedged: false,
    });
    assert!(result.is_err());
}

fn stdout(io: &IoSender, generation: u64, data: Bytes) {
    io.send(IoEvent::new(generation, IoKind::Stdout(data))).unwrap();
}

#[tokio::test]
async fn server_worker_runs_command_after_hello() {
    let launcher = FakeLauncher::new();
    let (mut fx, io) = Fixture::server(&launcher);

    let status = CommandLine::from(["status"]);
    let session = fx.agent.run_command(status.clone());
    fx.until_state(ServiceState::Starting).await;
    assert_eq!(launcher.launch_count(), 1);
    assert!(launcher.written(0).is_empty());

    stdout(&io, 1, frame(b'o', HELLO));
    fx.until_state(ServiceState::Ready).await;
    fx.until_started("status").await;
    assert_eq!(launcher.written(0), encode_runcommand(&status).unwrap());

    stdout(&io, 1, frame(b'o', b"M a.txt\n"));
    stdout(&io, 1, result_frame(0));
    let events = fx.until_finished(&session).await;

    assert_eq!(session.exit_code(), 0);
    assert_eq!(
        outputs_with_text(&events, "M a.txt\n"),
        vec![&AgentEvent::OutputReceived {
            text: "M a.txt\n".into(),
            label: String::new(),
        }]
    );
    assert_eq!(fx.agent.service_state(), ServiceState::Ready);
}

#[tokio::test]
async fn server_crash_fails_session_and_next_one_restarts_it() {
    let launcher = FakeLauncher::new();
    let (mut fx, io) = Fixture::server(&launcher);

    let first = fx.agent.run_command(["pull"]);
    let second = fx.agent.run_command(["status"]);
    fx.until_state(ServiceState::Starting).await;
    stdout(&io, 1, frame(b'o', HELLO));
    fx.until_started("pull").await;

    io.send(IoEvent::new(1, IoKind::Exited(-9))).unwrap();
    fx.until_finished(&first).await;
    assert_eq!(first.exit_code(), -1);
    assert!(first.error_string().contains("exited unexpectedly"), "{}", first.error_string());
    assert!(!second.is_finished());

    fx.until_state(ServiceState::Starting).await;
    assert_eq!(launcher.launch_count(), 2);
    let generation = launcher.generation(1);
    stdout(&io, generation, frame(b'o', HELLO));
    fx.until_started("status").await;
    assert_eq!(
        launcher.written(1),
        encode_runcommand(&CommandLine::from(["status"])).unwrap()
    );

    stdout(&io, generation, result_frame(0));
    fx.until_finished(&second).await;
    assert_eq!(second.exit_code(), 0);
}

#[tokio::test]
async fn line_input_is_answered_by_session_handler() {
    let launcher = FakeLauncher::new();
    let (mut fx, io) = Fixture::server(&launcher);

    let commit = CommandLine::from(["commit"]);
    let handler = ScriptedHandler::answering(&[Some("fix typo")]);
    let session = fx
        .agent
        .run_command_with(commit.clone(), Interaction::handler(handler));
    fx.until_state(ServiceState::Starting).await;
    stdout(&io, 1, frame(b'o', HELLO));
    fx.until_started("commit").await;

    stdout(&io, 1, input_request(b'L', 4096));
    stdout(&io, 1, result_frame(0));
    fx.until_finished(&session).await;
    assert_eq!(session.exit_code(), 0);

    let mut expected = encode_runcommand(&commit).unwrap();
    expected.extend(encode_line_reply(Some("fix typo"), 4096).unwrap().concat());
    assert_eq!(launcher.written(0), expected);
}
