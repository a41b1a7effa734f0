//! # Relay Protocol
//!
//! Binary wire format for relaying audio control events to subscribers.
//!
//! Every message is one tag byte followed by a fixed, big-endian payload.
//! There is no length prefix: the message length is the framing, so a
//! `Play` message carries `(len - 1) / 2` samples.
//!
//! ```text
//! 0 Start   tag + i32 sample rate
//! 1 Stop    tag
//! 2 Flush   tag
//! 3 Delay   reserved
//! 4 Play    tag + i16[N] samples
//! 5 Volume  tag + f32 level
//! 6 Parameters reserved
//! 7 Mute    tag + i32 enabled (0 | nonzero)
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use relay_protocol::Message;
//!
//! # fn main() -> Result<(), relay_protocol::ProtocolError> {
//! let bytes = Message::Start { sample_rate: 44100 }.to_bytes()?;
//! assert_eq!(bytes, [0x00, 0x00, 0x00, 0xAC, 0x44]);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod protocol;

// Re-export commonly used types
pub use buffer::MessageBuffer;
pub use protocol::{
    play_len, Message, MessageKind, ProtocolError, FLUSH_LEN, MUTE_LEN, START_LEN, STOP_LEN,
    VOLUME_LEN,
};
