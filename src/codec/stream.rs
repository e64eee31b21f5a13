//! Record splitting for raw process streams

use super::{ETX, SOH};

/// Splits a raw byte stream into codec records
///
/// Labelled records are delimited by `SOH ... ETX` and end at the first
/// ETX, so their text cannot contain one. Plain bytes between
/// records are emitted one line at a time; a trailing partial line is held
/// back until more data arrives or [`RecordSplitter::finish`] is called.
#[derive(Debug, Default)]
pub struct RecordSplitter {
    buffer: Vec<u8>,
}

impl RecordSplitter {
    /// Create an empty splitter
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes, returning every complete record
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut records = Vec::new();
        loop {
            let Some(&first) = self.buffer.first() else {
                break;
            };
            let end = if first == SOH {
                match self.buffer.iter().position(|&b| b == ETX) {
                    Some(etx) => etx + 1,
                    None => break,
                }
            } else {
                match self.buffer.iter().position(|&b| b == b'\n' || b == SOH) {
                    Some(i) if self.buffer[i] == b'\n' => i + 1,
                    Some(i) => i,
                    None => break,
                }
            };
            records.push(self.buffer.drain(..end).collect());
        }
        records
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Number of buffered bytes not yet returned
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
