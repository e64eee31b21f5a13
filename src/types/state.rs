//! Worker service state

use serde::{Deserialize, Serialize};

/// Lifecycle state of a service worker
///
/// `NoService` is reported by workers without a persistent connection; they
/// can always run a command. The other states describe a persistent command
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    /// Stateless worker, always able to run
    NoService,
    /// Persistent worker with no process
    NotRunning,
    /// Process spawned, waiting for the hello block
    Starting,
    /// Handshake complete, commands may be submitted
    Ready,
    /// Teardown requested, waiting for the process to exit
    Stopping,
    /// Teardown in progress with a fresh start queued behind it
    Restarting,
}

impl ServiceState {
    /// Whether a command may be started right now
    #[must_use]
    pub const fn can_run_command(self) -> bool {
        matches!(self, Self::NoService | Self::Ready)
    }

    /// Whether the state counts as a stopped service
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::NoService | Self::NotRunning)
    }

    /// Whether a persistent service is alive or on its way up/down
    #[must_use]
    pub const fn is_service_running(self) -> bool {
        !self.is_stopped()
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NoService => "no-service",
            Self::NotRunning => "not-running",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Restarting => "restarting",
        };
        f.write_str(name)
    }
}
