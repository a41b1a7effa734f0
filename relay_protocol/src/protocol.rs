use crate::buffer::MessageBuffer;
use log::trace;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message kind tag: {0}")]
    UnknownKind(u8),

    #[error("Could not allocate a {len} byte message buffer")]
    BufferAllocation { len: usize },

    #[error("Message buffer incomplete: expected {expected} bytes, wrote {written}")]
    Incomplete { expected: usize, written: usize },
}

pub const TAG_LEN: usize = 1;
pub const INT_LEN: usize = 4;
pub const FLOAT_LEN: usize = 4;
pub const SAMPLE_LEN: usize = 2;

pub const START_LEN: usize = TAG_LEN + INT_LEN;
pub const STOP_LEN: usize = TAG_LEN;
pub const FLUSH_LEN: usize = TAG_LEN;
pub const VOLUME_LEN: usize = TAG_LEN + FLOAT_LEN;
pub const MUTE_LEN: usize = TAG_LEN + INT_LEN;

/// Encoded size of a `Play` message carrying `samples` samples
pub const fn play_len(samples: usize) -> usize {
    TAG_LEN + SAMPLE_LEN * samples
}

/// Message kinds, one tag byte on the wire.
///
/// The ordinals are the wire tags. `Delay` and `Parameters` are reserved:
/// nothing encodes them, but their slots must not be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Start = 0,
    Stop = 1,
    Flush = 2,
    Delay = 3,
    Play = 4,
    Volume = 5,
    Parameters = 6,
    Mute = 7,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded size for kinds whose size doesn't depend on the payload
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            MessageKind::Start => Some(START_LEN),
            MessageKind::Stop => Some(STOP_LEN),
            MessageKind::Flush => Some(FLUSH_LEN),
            MessageKind::Volume => Some(VOLUME_LEN),
            MessageKind::Mute => Some(MUTE_LEN),
            MessageKind::Play | MessageKind::Delay | MessageKind::Parameters => None,
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, MessageKind::Delay | MessageKind::Parameters)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Start),
            1 => Ok(MessageKind::Stop),
            2 => Ok(MessageKind::Flush),
            3 => Ok(MessageKind::Delay),
            4 => Ok(MessageKind::Play),
            5 => Ok(MessageKind::Volume),
            6 => Ok(MessageKind::Parameters),
            7 => Ok(MessageKind::Mute),
            _ => Err(ProtocolError::UnknownKind(value)),
        }
    }
}

/// Audio control messages that can be encoded
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message<'a> {
    Start { sample_rate: i32 },
    Play { samples: &'a [i16] },
    Stop,
    Flush,
    Volume { level: f32 },
    Mute { enabled: i32 },
}

impl<'a> Message<'a> {
    /// Volume message from a double-precision level.
    ///
    /// The wire carries single precision; the level is narrowed with an
    /// `as` cast (round to nearest), so values outside `f32` range become
    /// infinities and NaN stays NaN. No clamping.
    pub fn volume(level: f64) -> Self {
        Message::Volume {
            level: level as f32,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Start { .. } => MessageKind::Start,
            Message::Play { .. } => MessageKind::Play,
            Message::Stop => MessageKind::Stop,
            Message::Flush => MessageKind::Flush,
            Message::Volume { .. } => MessageKind::Volume,
            Message::Mute { .. } => MessageKind::Mute,
        }
    }

    /// Exact number of bytes `encode_into` writes
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Start { .. } => START_LEN,
            Message::Play { samples } => play_len(samples.len()),
            Message::Stop => STOP_LEN,
            Message::Flush => FLUSH_LEN,
            Message::Volume { .. } => VOLUME_LEN,
            Message::Mute { .. } => MUTE_LEN,
        }
    }

    /// Serialize into a buffer sized with `encoded_len`.
    ///
    /// Layout: tag byte, then the payload fields big-endian with no padding
    /// and no length prefix. Panics if the buffer is too small.
    pub fn encode_into(&self, buffer: &mut MessageBuffer) {
        buffer.put_tag(self.kind().tag());

        match self {
            Message::Start { sample_rate } => buffer.put_i32(*sample_rate),
            Message::Play { samples } => buffer.put_i16_slice(samples),
            Message::Stop | Message::Flush => {}
            Message::Volume { level } => buffer.put_f32(*level),
            Message::Mute { enabled } => buffer.put_i32(*enabled),
        }
    }

    /// Allocate an exactly-sized buffer and encode into it
    pub fn to_buffer(&self) -> Result<MessageBuffer, ProtocolError> {
        let mut buffer = MessageBuffer::with_len(self.encoded_len())?;
        self.encode_into(&mut buffer);

        if !buffer.is_full() {
            return Err(ProtocolError::Incomplete {
                expected: buffer.len(),
                written: buffer.written(),
            });
        }

        trace!(
            "Encoded {:?} message ({} bytes)",
            self.kind(),
            buffer.written()
        );
        Ok(buffer)
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_buffer()?.into_bytes()
    }
}
