//! Session state machine
//!
//! [`SessionCore`] lives on the agent's control task. It never talks to a
//! worker itself: every input returns a [`SessionStep`] telling the agent
//! which events to publish and what to ask of the worker.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::interaction::InteractionHandler;
use crate::types::{CommandLine, Labels, OutputRecord, ProgressRecord, ServiceState, SessionId};

use super::{CommandSession, SessionShared};

/// Request from a session to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionAction {
    /// Start this command line
    Start(CommandLine),
    /// Interrupt the running command
    Abort,
}

/// Something the agent must publish on behalf of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Output(OutputRecord),
    Progress(ProgressRecord),
    /// Bookkeeping line such as a start or completion banner
    Control(String),
    /// The session is done; always the last event of a step
    Finished,
}

/// Outcome of feeding one input into a [`SessionCore`]
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SessionStep {
    pub(crate) events: Vec<SessionEvent>,
    pub(crate) action: Option<SessionAction>,
}

impl SessionStep {
    pub(crate) fn is_finished(&self) -> bool {
        self.events.last() == Some(&SessionEvent::Finished)
    }
}

/// Control-task side of a `CommandSession`
pub(crate) struct SessionCore {
    session: CommandSession,
    next_index: usize,
    in_flight: bool,
    open_topics: BTreeSet<String>,
    handler: Box<dyn InteractionHandler>,
}

impl SessionCore {
    pub(crate) fn new(session: CommandSession, handler: Box<dyn InteractionHandler>) -> Self {
        Self {
            session,
            next_index: 0,
            in_flight: false,
            open_topics: BTreeSet::new(),
            handler,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Handle given out for this session
    pub(crate) fn handle(&self) -> &CommandSession {
        &self.session
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        self.session.shared()
    }

    pub(crate) fn handler_mut(&mut self) -> &mut dyn InteractionHandler {
        self.handler.as_mut()
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.shared().state.lock().bound
    }

    fn is_finished(&self) -> bool {
        self.shared().state.lock().finished
    }

    /// Bind to the worker and start the first command if it can run now
    #[cfg(test)]
    pub(crate) fn run(&mut self, state: ServiceState) -> SessionStep {
        if self.bind() {
            self.start(state)
        } else {
            SessionStep::default()
        }
    }

    /// Mark the session as bound; false if it already was or is finished
    pub(crate) fn bind(&mut self) -> bool {
        let capture = {
            let mut guard = self.shared().state.lock();
            if guard.bound || guard.finished {
                return false;
            }
            guard.bound = true;
            guard.capture_output
        };
        if capture {
            let sink = self.shared().capture.clone();
            self.handler.set_data_output(Some(sink));
        }
        true
    }

    /// Start the first command of a bound session if the worker allows it
    pub(crate) fn start(&mut self, state: ServiceState) -> SessionStep {
        let mut step = SessionStep::default();
        if self.is_finished() || self.in_flight || self.next_index > 0 {
            return step;
        }
        if self.shared().cmdlines.is_empty() || state == ServiceState::NotRunning {
            self.finish(-1, &mut step);
        } else if state.can_run_command() {
            self.start_next(&mut step);
        }
        step
    }

    /// React to a worker state change
    pub(crate) fn on_service_state(&mut self, state: ServiceState) -> SessionStep {
        let mut step = SessionStep::default();
        if !self.is_bound() || self.is_finished() {
            return step;
        }
        if state == ServiceState::NotRunning {
            log::debug!("session {}: worker went down", self.id());
            self.in_flight = false;
            self.finish(-1, &mut step);
        } else if state.can_run_command() && !self.in_flight && self.next_index == 0 {
            self.start_next(&mut step);
        }
        step
    }

    /// The command in flight ended
    pub(crate) fn on_command_finished(&mut self, code: i32) -> SessionStep {
        let mut step = SessionStep::default();
        if !self.in_flight {
            log::warn!("session {}: unexpected command result {code}", self.id());
            return step;
        }
        self.in_flight = false;

        let aborted = self.shared().state.lock().aborted;
        step.events
            .push(SessionEvent::Control(completion_banner(code, aborted)));

        if code != 0 || self.next_index >= self.shared().cmdlines.len() {
            self.finish(code, &mut step);
        } else {
            self.start_next(&mut step);
        }
        step
    }

    pub(crate) fn on_output(&mut self, record: OutputRecord) -> SessionStep {
        let labels = record.labels();
        if labels.intersects(Labels::ERROR | Labels::WARNING) {
            let mut guard = self.shared().state.lock();
            if labels.contains(Labels::ERROR) {
                guard.error_text.push_str(&record.text);
            }
            if labels.contains(Labels::WARNING) {
                guard.warning_text.push_str(&record.text);
            }
        }
        SessionStep {
            events: vec![SessionEvent::Output(record)],
            action: None,
        }
    }

    pub(crate) fn on_progress(&mut self, record: ProgressRecord) -> SessionStep {
        if record.is_closed() {
            self.open_topics.remove(&record.topic);
        } else {
            self.open_topics.insert(record.topic.clone());
        }
        SessionStep {
            events: vec![SessionEvent::Progress(record)],
            action: None,
        }
    }

    /// Abort the session
    ///
    /// A running command is interrupted and the rest of the queue skipped; a
    /// session that has not started yet finishes right away.
    pub(crate) fn abort(&mut self) -> SessionStep {
        let mut step = SessionStep::default();
        if self.is_finished() {
            return step;
        }
        self.shared().state.lock().aborted = true;
        if self.in_flight {
            self.next_index = self.shared().cmdlines.len();
            step.action = Some(SessionAction::Abort);
        } else {
            self.finish(-1, &mut step);
        }
        step
    }

    fn start_next(&mut self, step: &mut SessionStep) {
        let cmdline = self.shared().cmdlines[self.next_index].clone();
        self.next_index += 1;
        self.in_flight = true;
        self.shared().state.lock().running = true;
        step.events
            .push(SessionEvent::Control(format!("% {}", cmdline.display())));
        step.action = Some(SessionAction::Start(cmdline));
    }

    fn finish(&mut self, code: i32, step: &mut SessionStep) {
        for topic in std::mem::take(&mut self.open_topics) {
            step.events
                .push(SessionEvent::Progress(ProgressRecord::closing(topic)));
        }
        self.handler.set_data_output(None);
        self.shared().publish_finished(code);
        step.events.push(SessionEvent::Finished);
    }
}

fn completion_banner(code: i32, aborted: bool) -> String {
    let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
    if aborted {
        format!("[command terminated by user {now}]")
    } else if code < 0 {
        format!("[command interrupted {now}]")
    } else if code == 0 {
        format!("[command completed successfully {now}]")
    } else {
        format!("[command returned code {code} {now}]")
    }
}
