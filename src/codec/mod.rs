//! Message and progress codec
//!
//! A single output record travels as bytes between the child process and the
//! worker. The codec is a pluggable boundary: workers only depend on the
//! [`MessageCodec`] trait, and [`DefaultCodec`] documents its own versioned
//! wire format.
//!
//! # Wire Format (version 1)
//!
//! ```text
//! labelled record:  SOH label STX text ETX      (0x01, 0x02, 0x03)
//! plain record:     text                         (no leading SOH)
//! progress text:    topic US pos US item US unit US total   (US = 0x1f)
//! ```
//!
//! A progress record is a labelled record tagged `ui.progress`; an empty
//! `pos` or `total` field means "none".
//!
//! There is no escaping. The label must not contain STX, and on a raw
//! process stream the text of a labelled record must not contain ETX: the
//! [`RecordSplitter`] ends the record at the first ETX and the rest arrives
//! as plain output. Command server frames carry one record each, so there
//! the text may contain ETX.

mod stream;

pub use stream::RecordSplitter;

use crate::error::{CommandError, Result};
use crate::types::ProgressRecord;

/// Wire format version implemented by [`DefaultCodec`]
pub const CODEC_VERSION: u32 = 1;

pub(crate) const SOH: u8 = 0x01;
pub(crate) const STX: u8 = 0x02;
pub(crate) const ETX: u8 = 0x03;
const US: &str = "\u{1f}";

/// Encode/decode one output or progress record
pub trait MessageCodec: Send + Sync {
    /// Pack `text` with `label` into one record
    fn pack_message(&self, text: &str, label: &str) -> Vec<u8>;

    /// Unpack one record into `(text, label)`
    ///
    /// # Errors
    /// Returns error if the record is malformed
    fn unpack_message(&self, data: &[u8]) -> Result<(String, String)>;

    /// Render a progress record as the text of a `ui.progress` record
    fn pack_progress(&self, progress: &ProgressRecord) -> String;

    /// Parse the text of a `ui.progress` record
    ///
    /// # Errors
    /// Returns error if the field count or a number is invalid
    fn unpack_progress(&self, text: &str) -> Result<ProgressRecord>;
}

/// Version 1 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl MessageCodec for DefaultCodec {
    fn pack_message(&self, text: &str, label: &str) -> Vec<u8> {
        if label.is_empty() && !text.as_bytes().contains(&SOH) {
            return text.as_bytes().to_vec();
        }
        let mut out = Vec::with_capacity(text.len() + label.len() + 3);
        out.push(SOH);
        out.extend_from_slice(label.as_bytes());
        out.push(STX);
        out.extend_from_slice(text.as_bytes());
        out.push(ETX);
        out
    }

    fn unpack_message(&self, data: &[u8]) -> Result<(String, String)> {
        let Some(rest) = data.strip_prefix(&[SOH]) else {
            return Ok((String::from_utf8_lossy(data).into_owned(), String::new()));
        };
        let stx = rest
            .iter()
            .position(|&b| b == STX)
            .ok_or_else(|| CommandError::codec("labelled record without text separator"))?;
        let label = &rest[..stx];
        let body = &rest[stx + 1..];
        let text = body.strip_suffix(&[ETX]).unwrap_or(body);
        Ok((
            String::from_utf8_lossy(text).into_owned(),
            String::from_utf8_lossy(label).into_owned(),
        ))
    }

    fn pack_progress(&self, progress: &ProgressRecord) -> String {
        let pos = progress.pos.map(|p| p.to_string()).unwrap_or_default();
        let total = progress.total.map(|t| t.to_string()).unwrap_or_default();
        [
            progress.topic.as_str(),
            pos.as_str(),
            progress.item.as_str(),
            progress.unit.as_str(),
            total.as_str(),
        ]
        .join(US)
    }

    fn unpack_progress(&self, text: &str) -> Result<ProgressRecord> {
        let fields: Vec<&str> = text.split(US).collect();
        let [topic, pos, item, unit, total] = fields.as_slice() else {
            return Err(CommandError::codec(format!(
                "progress record has {} fields, expected 5",
                fields.len()
            )));
        };
        Ok(ProgressRecord {
            topic: (*topic).to_string(),
            pos: parse_optional_int(pos)?,
            item: (*item).to_string(),
            unit: (*unit).to_string(),
            total: parse_optional_int(total)?,
        })
    }
}

fn parse_optional_int(field: &str) -> Result<Option<i64>> {
    if field.is_empty() {
        return Ok(None);
    }
    field
        .parse()
        .map(Some)
        .map_err(|e| CommandError::codec(format!("invalid progress number {field:?}: {e}")))
}
