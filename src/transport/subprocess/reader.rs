//! Pipe pumping tasks for a spawned child

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::{IoEvent, IoKind, IoSender};

const READ_CHUNK: usize = 8192;

/// Forward everything read from `pipe` to the control task
pub(super) fn spawn_pipe_reader<R>(
    mut pipe: R,
    generation: u64,
    io_tx: IoSender,
    kind: fn(Bytes) -> IoKind,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buffer[..n]);
                    if io_tx.send(IoEvent::new(generation, kind(chunk))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("child {generation}: pipe read failed: {e}");
                    break;
                }
            }
        }
    })
}

/// Drain queued input into the child's stdin; shut it down once the
/// sending side is dropped
pub(super) fn spawn_input_writer<W>(
    mut stdin: W,
    mut input_rx: mpsc::UnboundedReceiver<Bytes>,
    generation: u64,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(data) = input_rx.recv().await {
            if let Err(e) = stdin.write_all(&data).await {
                log::debug!("child {generation}: stdin write failed: {e}");
                return;
            }
            if let Err(e) = stdin.flush().await {
                log::debug!("child {generation}: stdin flush failed: {e}");
                return;
            }
        }
        let _ = stdin.shutdown().await;
    })
}
