//! Events published by a `CommandAgent`

use crate::session::CommandSession;
use crate::types::{ProgressRecord, ServiceState};

/// Notification delivered to every subscriber of an agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Output of the running session, including its `control` lines
    OutputReceived {
        /// Output text
        text: String,
        /// Label; empty for plain data
        label: String,
    },
    /// Progress of the running session
    ProgressReceived(ProgressRecord),
    /// A start or completion banner of the running session
    ControlMessage(String),
    /// A session finished; carries the session itself
    CommandFinished(CommandSession),
    /// The service reached a stopped state after `stop_service`
    ServiceStopped,
    /// The session queue became non-empty (`true`) or empty (`false`)
    BusyChanged(bool),
    /// The worker's service state changed
    ServiceStateChanged(ServiceState),
}
