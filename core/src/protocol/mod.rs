//! Wire protocol: message envelope, transport framing, and the engine
//!
//! Two distinct chunking layers live here and must not be conflated:
//! - `frame`: the transport boundary splits one serialized message into
//!   small fixed-size frames for BLE writes (lower layer).
//! - `CHUNK_DATA` messages: one slice of the map artifact itself,
//!   addressed by sequence number (upper layer, see `transfer`).

pub mod engine;
pub mod frame;
pub mod message;

pub use engine::ProtocolEngine;
pub use frame::{split_message, FrameReassembler, DEFAULT_FRAME_SIZE, FRAME_OVERHEAD};
pub use message::{Message, TransferMetadata};

use thiserror::Error;

/// Protocol-layer errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("device {0} is not authenticated")]
    Unauthenticated(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("frame {index} out of range (count {count})")]
    FrameOutOfRange { index: u16, count: u16 },

    #[error("inconsistent frame count: expected {expected}, got {got}")]
    FrameCountMismatch { expected: u16, got: u16 },

    #[error("frame CRC32 mismatch")]
    FrameCrcMismatch,

    #[error("message too large to frame: {0} bytes")]
    MessageTooLarge(usize),
}

impl ProtocolError {
    /// Stable wire code for `ERROR` messages.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Unauthenticated(_) => "unauthenticated",
            ProtocolError::MalformedFrame(_) => "malformed_frame",
            ProtocolError::DecodeFailed(_) => "decode_failed",
            ProtocolError::FrameOutOfRange { .. } => "frame_out_of_range",
            ProtocolError::FrameCountMismatch { .. } => "frame_count_mismatch",
            ProtocolError::FrameCrcMismatch => "frame_crc_mismatch",
            ProtocolError::MessageTooLarge(_) => "message_too_large",
        }
    }
}
