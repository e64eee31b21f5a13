//! The agent's control task

use std::future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};

use crate::session::sequencer::SessionCore;
use crate::transport::IoReceiver;
use crate::types::SessionId;
use crate::worker::ServiceWorker;

use super::AgentEvent;
use super::scheduler::AgentCore;

/// Message from a handle to the control task
pub(crate) enum Request {
    Enqueue(SessionCore),
    AbortSession(SessionId),
    AbortAll,
    StopService,
    Subscribe(mpsc::UnboundedSender<AgentEvent>),
    Shutdown(oneshot::Sender<()>),
}

/// Run the control loop until shutdown
///
/// Turn order: handle requests first, then one deferred job, then child
/// I/O, then the worker timer. A deferred job therefore always runs on a
/// later turn than the request or I/O event that posted it.
pub(crate) async fn run<W: ServiceWorker>(
    mut core: AgentCore<W>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    mut io: IoReceiver,
    shutdown_timeout: Duration,
) {
    let mut subscribers: Vec<mpsc::UnboundedSender<AgentEvent>> = Vec::new();
    let mut accepting = true;
    let mut shutdown_deadline: Option<Instant> = None;
    let mut shutdown_replies: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        let has_deferred = core.has_deferred();
        let worker_deadline = core.worker_deadline();

        tokio::select! {
            biased;

            request = requests.recv(), if accepting => match request {
                Some(Request::Enqueue(session)) => {
                    core.enqueue(session);
                    // Late arrivals during shutdown never start
                    if shutdown_deadline.is_some() {
                        core.abort_all();
                    }
                }
                Some(Request::AbortSession(id)) => core.abort_session(id),
                Some(Request::AbortAll) => core.abort_all(),
                Some(Request::StopService) => core.stop_service(),
                Some(Request::Subscribe(tx)) => subscribers.push(tx),
                Some(Request::Shutdown(reply)) => {
                    shutdown_replies.push(reply);
                    begin_shutdown(&mut core, &mut shutdown_deadline, shutdown_timeout);
                }
                None => {
                    log::debug!("every agent handle dropped");
                    accepting = false;
                    begin_shutdown(&mut core, &mut shutdown_deadline, shutdown_timeout);
                }
            },
            () = future::ready(()), if has_deferred => core.run_deferred(),
            Some(event) = io.recv() => core.handle_io(event),
            () = sleep_until(worker_deadline.unwrap_or_else(Instant::now)), if worker_deadline.is_some() => {
                core.handle_timeout();
            }
            () = sleep_until(shutdown_deadline.unwrap_or_else(Instant::now)), if shutdown_deadline.is_some() => {
                log::warn!("worker did not stop within {shutdown_timeout:?}");
                break;
            }
            else => break,
        }

        let events = core.take_events();
        if !events.is_empty() {
            subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        }

        if shutdown_deadline.is_some() && core.is_quiescent() {
            break;
        }
    }

    core.finish_all();
    for event in core.take_events() {
        for tx in &subscribers {
            let _ = tx.send(event.clone());
        }
    }
    for reply in shutdown_replies {
        let _ = reply.send(());
    }
    log::debug!("agent control task exited");
}

fn begin_shutdown<W: ServiceWorker>(
    core: &mut AgentCore<W>,
    deadline: &mut Option<Instant>,
    timeout: Duration,
) {
    if deadline.is_none() {
        log::info!("shutting down command agent");
        *deadline = Some(Instant::now() + timeout);
        core.abort_all();
        core.stop_service();
    }
}
