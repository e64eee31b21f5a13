//! Spawning and reaping of worker subprocesses

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{CommandError, Result};
use crate::transport::{ChildHandle, Invocation, IoEvent, IoKind, IoSender, Launcher};

use super::reader::{spawn_input_writer, spawn_pipe_reader};

/// How long the reaper waits for the pipes after the child was reaped
///
/// A background process of the child may keep them open indefinitely.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// [`Launcher`] starting real OS processes
///
/// Each child gets a fresh generation number. Its stdout and stderr are
/// forwarded as [`IoEvent`]s; once the process was reaped and both pipes hit
/// EOF (or [`PIPE_DRAIN_GRACE`] passed) an [`IoKind::Exited`] event closes the
/// generation.
#[derive(Debug)]
pub struct SubprocessLauncher {
    io_tx: IoSender,
    next_generation: u64,
}

impl SubprocessLauncher {
    /// Create a launcher reporting to `io_tx`
    #[must_use]
    pub const fn new(io_tx: IoSender) -> Self {
        Self {
            io_tx,
            next_generation: 1,
        }
    }
}

impl Launcher for SubprocessLauncher {
    fn launch(&mut self, invocation: &Invocation) -> Result<ChildHandle> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        // Own process group so an interrupt reaches the whole command tree
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(cwd) = &invocation.cwd
                && !cwd.exists()
            {
                return CommandError::spawn(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                ));
            }
            CommandError::spawn(format!("{}: {e}", invocation.program.display()))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CommandError::spawn("failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CommandError::spawn("failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CommandError::spawn("failed to get stderr handle"))?;

        let generation = self.next_generation;
        self.next_generation += 1;
        let pid = child.id();
        log::debug!(
            "child {generation} started (pid {pid:?}): {} {:?}",
            invocation.program.display(),
            invocation.args
        );

        let readers = [
            spawn_pipe_reader(stdout, generation, self.io_tx.clone(), IoKind::Stdout),
            spawn_pipe_reader(stderr, generation, self.io_tx.clone(), IoKind::Stderr),
        ];
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        spawn_input_writer(stdin, input_rx, generation);
        let (kill_tx, kill_rx) = oneshot::channel();
        spawn_reaper(child, kill_rx, readers, generation, self.io_tx.clone());

        Ok(ChildHandle::new(generation, pid, input_tx, Some(kill_tx)))
    }
}

/// Wait for the child, killing it if the handle asks for it or goes away
fn spawn_reaper(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    mut readers: [JoinHandle<()>; 2],
    generation: u64,
    io_tx: IoSender,
) {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    log::debug!("child {generation}: kill failed: {e}");
                }
                child.wait().await
            }
        };
        // Output must reach the control task before the exit does
        let drained = tokio::time::timeout(PIPE_DRAIN_GRACE, async {
            for reader in &mut readers {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            log::debug!("child {generation}: pipes still open after exit, detaching");
            for reader in &readers {
                reader.abort();
            }
        }
        let code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                log::warn!("child {generation}: wait failed: {e}");
                -1
            }
        };
        log::debug!("child {generation} exited with {code}");
        let _ = io_tx.send(IoEvent::new(generation, IoKind::Exited(code)));
    });
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or(1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
