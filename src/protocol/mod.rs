//! Command server channel protocol
//!
//! Every message from the server is a frame:
//!
//! ```text
//! +-----------+----------------------------+------------------+
//! | channel   | length (4 bytes, BE)       | payload          |
//! +-----------+----------------------------+------------------+
//! ```
//!
//! except input requests (`I`, `L`), where the length is the maximum reply
//! size and no payload follows. Client messages are either the literal
//! `runcommand\n` line or length-prefixed blocks without a channel byte.

mod frame;
mod hello;

pub use frame::{
    encode_block, encode_line_reply, encode_runcommand, Channel, ChannelDecoder, Frame,
    HEADER_LEN, MAX_PAYLOAD_LEN,
};
pub use hello::{Hello, REQUIRED_CAPABILITY};
