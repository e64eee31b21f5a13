//! Session scheduling on the control task

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::interaction::{InteractionHandler, NullInteraction};
use crate::session::CommandSession;
use crate::session::sequencer::{SessionAction, SessionCore, SessionEvent, SessionStep};
use crate::transport::IoEvent;
use crate::types::{CONTROL_LABEL, ServiceState, SessionId};
use crate::worker::{ServiceWorker, WorkerContext, WorkerEvent};

use super::AgentEvent;

/// Work posted for a later turn of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    RunNextSession,
    DispatchWorker,
    ServiceStopped,
}

/// Owner of the worker and the session queue
///
/// The front of the queue is the active session. Continuations (running the
/// next session, dispatching parsed worker input, reporting a stopped
/// service) are posted to `deferred` and run by the control loop on a later
/// turn, never inside the call that caused them.
pub(crate) struct AgentCore<W> {
    worker: W,
    queue: VecDeque<SessionCore>,
    deferred: VecDeque<Deferred>,
    idle_handler: NullInteraction,
    outbox: Vec<AgentEvent>,
    busy: Arc<AtomicUsize>,
    service_state: Arc<Mutex<ServiceState>>,
    stop_requested: bool,
}

impl<W: ServiceWorker> AgentCore<W> {
    pub(crate) fn new(
        worker: W,
        busy: Arc<AtomicUsize>,
        service_state: Arc<Mutex<ServiceState>>,
    ) -> Self {
        *service_state.lock() = worker.service_state();
        Self {
            worker,
            queue: VecDeque::new(),
            deferred: VecDeque::new(),
            idle_handler: NullInteraction::new(),
            outbox: Vec::new(),
            busy,
            service_state,
            stop_requested: false,
        }
    }

    pub(crate) fn take_events(&mut self) -> Vec<AgentEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub(crate) fn worker_deadline(&self) -> Option<Instant> {
        self.worker.deadline()
    }

    /// Nothing queued, nothing running and no service left to wait for
    pub(crate) fn is_quiescent(&self) -> bool {
        self.queue.is_empty()
            && self.deferred.is_empty()
            && !self.worker.is_command_running()
            && self.worker.service_state().is_stopped()
    }

    fn defer(&mut self, job: Deferred) {
        if !self.deferred.contains(&job) {
            self.deferred.push_back(job);
        }
    }

    pub(crate) fn enqueue(&mut self, session: SessionCore) {
        log::debug!("session {} queued", session.id());
        let was_idle = self.queue.is_empty();
        self.queue.push_back(session);
        if was_idle {
            self.outbox.push(AgentEvent::BusyChanged(true));
            self.defer(Deferred::RunNextSession);
        }
    }

    pub(crate) fn run_deferred(&mut self) {
        let Some(job) = self.deferred.pop_front() else {
            return;
        };
        match job {
            Deferred::RunNextSession => self.run_next_session(),
            Deferred::DispatchWorker => self.call_worker(|w, cx| w.dispatch(cx)),
            Deferred::ServiceStopped => self.outbox.push(AgentEvent::ServiceStopped),
        }
    }

    pub(crate) fn handle_io(&mut self, event: IoEvent) {
        self.call_worker(|w, cx| w.handle_io(event, cx));
    }

    pub(crate) fn handle_timeout(&mut self) {
        self.call_worker(|w, cx| w.handle_timeout(cx));
    }

    pub(crate) fn stop_service(&mut self) {
        self.stop_requested = true;
        self.call_worker(|w, cx| w.stop_service(cx));
        if self.stop_requested && self.worker.service_state().is_stopped() {
            self.stop_requested = false;
            self.defer(Deferred::ServiceStopped);
        }
    }

    /// Abort one session; waiting sessions leave the queue without touching
    /// the worker
    pub(crate) fn abort_session(&mut self, id: SessionId) {
        let Some(index) = self.queue.iter().position(|s| s.id() == id) else {
            log::debug!("session {id} is not queued");
            return;
        };
        if index == 0 {
            let step = self.queue[0].abort();
            let mut work = VecDeque::new();
            self.apply_step(step, &mut work);
            self.route_worker_events(work);
        } else if let Some(mut session) = self.queue.remove(index) {
            log::debug!("session {id} dropped before its turn");
            let step = session.abort();
            self.publish_detached(&session, step);
            self.busy.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn abort_all(&mut self) {
        let ids: Vec<SessionId> = self.queue.iter().map(SessionCore::id).collect();
        for id in ids {
            self.abort_session(id);
        }
    }

    fn run_next_session(&mut self) {
        let Some(front) = self.queue.front_mut() else {
            return;
        };
        // Bound first so that start-up errors land in the session
        if !front.bind() {
            return;
        }
        self.call_worker(|w, cx| w.start_service(cx));
        let state = self.worker.service_state();
        let Some(front) = self.queue.front_mut() else {
            return;
        };
        log::debug!("session {} runs, service {state}", front.id());
        let step = front.start(state);
        let mut work = VecDeque::new();
        self.apply_step(step, &mut work);
        self.route_worker_events(work);
    }

    /// Call into the worker with the active session's handler
    fn invoke_worker<F>(&mut self, f: F) -> VecDeque<WorkerEvent>
    where
        F: FnOnce(&mut W, &mut WorkerContext<'_>),
    {
        let mut events = VecDeque::new();
        let handler: &mut dyn InteractionHandler = match self.queue.front_mut() {
            Some(front) if front.is_bound() => front.handler_mut(),
            _ => &mut self.idle_handler,
        };
        let mut cx = WorkerContext::new(handler, &mut events);
        f(&mut self.worker, &mut cx);
        if cx.dispatch_requested() {
            self.defer(Deferred::DispatchWorker);
        }
        events
    }

    fn call_worker<F>(&mut self, f: F)
    where
        F: FnOnce(&mut W, &mut WorkerContext<'_>),
    {
        let events = self.invoke_worker(f);
        self.route_worker_events(events);
    }

    /// Route worker events to the active session
    ///
    /// Worker calls made while routing append to the same work list instead
    /// of recursing.
    fn route_worker_events(&mut self, mut work: VecDeque<WorkerEvent>) {
        while let Some(event) = work.pop_front() {
            let front = self.queue.front_mut().filter(|s| s.is_bound());
            match event {
                WorkerEvent::ServiceStateChanged(state) => {
                    *self.service_state.lock() = state;
                    self.outbox.push(AgentEvent::ServiceStateChanged(state));
                    if self.stop_requested && state.is_stopped() {
                        self.stop_requested = false;
                        self.defer(Deferred::ServiceStopped);
                    }
                    if let Some(front) = self.queue.front_mut().filter(|s| s.is_bound()) {
                        let step = front.on_service_state(state);
                        self.apply_step(step, &mut work);
                    }
                }
                WorkerEvent::CommandFinished(code) => match front {
                    Some(front) => {
                        let step = front.on_command_finished(code);
                        self.apply_step(step, &mut work);
                    }
                    None => log::warn!("command result {code} without an active session"),
                },
                WorkerEvent::Output(record) => match front {
                    Some(front) => {
                        let step = front.on_output(record);
                        self.apply_step(step, &mut work);
                    }
                    None => self.outbox.push(AgentEvent::OutputReceived {
                        text: record.text,
                        label: record.label,
                    }),
                },
                WorkerEvent::Progress(record) => match front {
                    Some(front) => {
                        let step = front.on_progress(record);
                        self.apply_step(step, &mut work);
                    }
                    None => self.outbox.push(AgentEvent::ProgressReceived(record)),
                },
            }
        }
    }

    /// Publish a step of the active session and forward its request to the
    /// worker
    fn apply_step(&mut self, step: SessionStep, work: &mut VecDeque<WorkerEvent>) {
        for event in step.events {
            match event {
                SessionEvent::Output(record) => self.outbox.push(AgentEvent::OutputReceived {
                    text: record.text,
                    label: record.label,
                }),
                SessionEvent::Progress(record) => {
                    self.outbox.push(AgentEvent::ProgressReceived(record));
                }
                SessionEvent::Control(text) => self.push_control(text),
                SessionEvent::Finished => self.finish_front(),
            }
        }
        match step.action {
            Some(SessionAction::Start(cmdline)) => {
                let events = self.invoke_worker(|w, cx| w.start_command(&cmdline, cx));
                work.extend(events);
            }
            Some(SessionAction::Abort) => self.worker.abort_command(),
            None => {}
        }
    }

    fn push_control(&mut self, text: String) {
        self.outbox.push(AgentEvent::ControlMessage(text.clone()));
        self.outbox.push(AgentEvent::OutputReceived {
            text: format!("{text}\n"),
            label: CONTROL_LABEL.to_string(),
        });
    }

    fn finish_front(&mut self) {
        let Some(session) = self.queue.pop_front() else {
            return;
        };
        log::debug!("session {} finished", session.id());
        self.busy.fetch_sub(1, Ordering::SeqCst);
        self.outbox
            .push(AgentEvent::CommandFinished(handle_of(&session)));
        if self.queue.is_empty() {
            self.outbox.push(AgentEvent::BusyChanged(false));
        } else {
            self.defer(Deferred::RunNextSession);
        }
    }

    /// Publish a step of a session that already left the queue
    fn publish_detached(&mut self, session: &SessionCore, step: SessionStep) {
        for event in step.events {
            match event {
                SessionEvent::Finished => self
                    .outbox
                    .push(AgentEvent::CommandFinished(handle_of(session))),
                SessionEvent::Control(text) => self.push_control(text),
                SessionEvent::Output(_) | SessionEvent::Progress(_) => {}
            }
        }
    }

    /// Finish every remaining session; used when the control task exits
    pub(crate) fn finish_all(&mut self) {
        let was_busy = !self.queue.is_empty();
        while let Some(mut session) = self.queue.pop_front() {
            let mut step = session.abort();
            if !step.is_finished() {
                session.shared().publish_finished(-1);
                step.events.push(SessionEvent::Finished);
            }
            self.publish_detached(&session, step);
            self.busy.fetch_sub(1, Ordering::SeqCst);
        }
        if was_busy {
            self.outbox.push(AgentEvent::BusyChanged(false));
        }
    }
}

fn handle_of(session: &SessionCore) -> CommandSession {
    session.handle().clone()
}
