//! Channel framing for the command server pipe

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{CommandError, Result};
use crate::types::CommandLine;

/// Size of a frame header: channel byte + big-endian u32
pub const HEADER_LEN: usize = 5;

/// Largest payload accepted from the server (guards against garbage lengths)
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One-byte channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `o`: stdout-style output record
    Output,
    /// `e`: stderr-style output record
    Error,
    /// `r`: command result
    Result,
    /// `d`: debug output
    Debug,
    /// `I`: raw data input request
    DataInput,
    /// `L`: line input request
    LineInput,
    /// Any other channel byte
    Other(u8),
}

impl Channel {
    /// Decode a channel byte
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            b'o' => Self::Output,
            b'e' => Self::Error,
            b'r' => Self::Result,
            b'd' => Self::Debug,
            b'I' => Self::DataInput,
            b'L' => Self::LineInput,
            other => Self::Other(other),
        }
    }

    /// Encode as a channel byte
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Output => b'o',
            Self::Error => b'e',
            Self::Result => b'r',
            Self::Debug => b'd',
            Self::DataInput => b'I',
            Self::LineInput => b'L',
            Self::Other(other) => other,
        }
    }

    /// Input requests carry a size instead of a payload
    #[must_use]
    pub const fn is_input_request(self) -> bool {
        matches!(self, Self::DataInput | Self::LineInput)
    }

    /// Uppercase channels must be understood by the client
    #[must_use]
    pub const fn is_required(self) -> bool {
        self.as_byte().is_ascii_uppercase()
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Channel with payload
    Data {
        /// Channel the payload arrived on
        channel: Channel,
        /// Payload bytes
        payload: Bytes,
    },
    /// Input request; `size` is the most the server will accept per block
    InputRequest {
        /// `I` or `L`
        channel: Channel,
        /// Maximum reply block size
        size: usize,
    },
}

/// Decoder turning raw server output into [`Frame`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelDecoder;

impl Decoder for ChannelDecoder {
    type Item = Frame;
    type Error = CommandError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let channel = Channel::from_byte(src[0]);
        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;

        if channel.is_input_request() {
            src.advance(HEADER_LEN);
            return Ok(Some(Frame::InputRequest {
                channel,
                size: length,
            }));
        }

        if length > MAX_PAYLOAD_LEN {
            return Err(CommandError::protocol(format!(
                "frame on channel '{}' announces {length} bytes, limit is {MAX_PAYLOAD_LEN}",
                channel.as_byte().escape_ascii()
            )));
        }
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame::Data { channel, payload }))
    }
}

/// Encode one length-prefixed block (client to server)
#[must_use]
pub fn encode_block(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode a `runcommand` request
///
/// # Errors
/// Returns error if an argument contains a NUL byte, which would corrupt
/// the argument vector on the server side
pub fn encode_runcommand(cmdline: &CommandLine) -> Result<Vec<u8>> {
    if let Some(arg) = cmdline.args().iter().find(|a| a.contains('\0')) {
        return Err(CommandError::encoding(format!(
            "argument {arg:?} contains a NUL byte"
        )));
    }
    let joined = cmdline.args().join("\0");
    let mut out = b"runcommand\n".to_vec();
    out.extend(encode_block(joined.as_bytes()));
    Ok(out)
}

/// Encode the reply to an `L` request of `size` bytes
///
/// `None` means the user declined to answer and yields a single empty block.
/// Otherwise the text plus a trailing newline is split into blocks of at most
/// `size` bytes.
///
/// # Errors
/// Returns error if the server asked for zero bytes but an answer is given
pub fn encode_line_reply(answer: Option<&str>, size: usize) -> Result<Vec<Vec<u8>>> {
    let Some(text) = answer else {
        return Ok(vec![encode_block(b"")]);
    };
    if size == 0 {
        return Err(CommandError::encoding(
            "server requested a zero-sized line input",
        ));
    }
    let mut data = text.as_bytes().to_vec();
    data.push(b'\n');
    Ok(data.chunks(size).map(encode_block).collect())
}
