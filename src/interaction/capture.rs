//! In-memory FIFO for captured command output

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

/// Shared byte FIFO a session redirects unlabeled output into
///
/// Clones share the same buffer: the interaction handler writes into it on
/// the control task while the session handle reads from any task.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<BytesMut>>,
}

impl CaptureBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes
    pub fn write(&self, data: &[u8]) -> usize {
        self.inner.lock().extend_from_slice(data);
        data.len()
    }

    /// Remove and return up to `max` bytes
    #[must_use]
    pub fn read(&self, max: usize) -> Vec<u8> {
        let mut buf = self.inner.lock();
        let n = max.min(buf.len());
        buf.split_to(n).to_vec()
    }

    /// Remove and return everything
    #[must_use]
    pub fn read_all(&self) -> Vec<u8> {
        self.inner.lock().split().to_vec()
    }

    /// Remove and return one line including its newline, or the remainder
    /// if no newline is buffered
    #[must_use]
    pub fn read_line(&self) -> Vec<u8> {
        let mut buf = self.inner.lock();
        let n = buf
            .iter()
            .position(|&b| b == b'\n')
            .map_or(buf.len(), |i| i + 1);
        buf.split_to(n).to_vec()
    }

    /// Return up to `max` bytes without consuming them
    #[must_use]
    pub fn peek(&self, max: usize) -> Vec<u8> {
        let buf = self.inner.lock();
        buf[..max.min(buf.len())].to_vec()
    }

    /// Number of buffered bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Whether a complete line is buffered
    #[must_use]
    pub fn can_read_line(&self) -> bool {
        self.inner.lock().contains(&b'\n')
    }

    /// Drop `n` bytes from the front
    pub fn skip(&self, n: usize) {
        let mut buf = self.inner.lock();
        let n = n.min(buf.len());
        buf.advance(n);
    }
}
