//! Transport-boundary framing
//!
//! BLE characteristics only carry small writes, so one serialized
//! message is split into fixed-size frames and reassembled on the far
//! side. This layer is oblivious to message contents; it moves opaque
//! bytes and detects corruption, truncation, and mixed-up frame sets.
//!
//! Frame format (10 bytes overhead):
//! [2 bytes] frame index (LE u16)
//! [2 bytes] frame count (LE u16)
//! [2 bytes] payload length (LE u16)
//! [N bytes] payload
//! [4 bytes] CRC32 over index + count + length + payload

use super::ProtocolError;
use crc32fast::Hasher;
use std::collections::BTreeMap;

/// Default transport frame size, matching the BLE write budget.
pub const DEFAULT_FRAME_SIZE: usize = 128;

/// Header + CRC bytes per frame.
pub const FRAME_OVERHEAD: usize = 10;

/// Split a serialized message into frames of at most `frame_size`
/// bytes each. An empty message still produces one frame.
pub fn split_message(message: &[u8], frame_size: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if frame_size <= FRAME_OVERHEAD {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame size {frame_size} does not exceed overhead {FRAME_OVERHEAD}"
        )));
    }
    // The payload length field is a u16; a larger frame could not be
    // encoded without truncation.
    if frame_size > FRAME_OVERHEAD + u16::MAX as usize {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame size {frame_size} exceeds the encodable maximum {}",
            FRAME_OVERHEAD + u16::MAX as usize
        )));
    }
    let capacity = frame_size - FRAME_OVERHEAD;

    let count = message.len().div_ceil(capacity).max(1);
    if count > u16::MAX as usize {
        return Err(ProtocolError::MessageTooLarge(message.len()));
    }

    let mut frames = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * capacity;
        let end = (start + capacity).min(message.len());
        frames.push(encode_frame(
            index as u16,
            count as u16,
            &message[start..end],
        ));
    }
    Ok(frames)
}

fn encode_frame(index: u16, count: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.extend_from_slice(&index.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    buf
}

/// Collects frames for one logical message, tolerating reordering and
/// duplicates, and yields the reassembled bytes once every frame has
/// arrived.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    expected_count: Option<u16>,
    parts: BTreeMap<u16, Vec<u8>>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one frame. Returns the full message when this frame
    /// completes the set, `None` while frames are still outstanding.
    pub fn push(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ProtocolError> {
        let (index, count, payload) = decode_frame(frame)?;

        match self.expected_count {
            None => self.expected_count = Some(count),
            Some(expected) if expected != count => {
                return Err(ProtocolError::FrameCountMismatch {
                    expected,
                    got: count,
                });
            }
            Some(_) => {}
        }
        if index >= count {
            return Err(ProtocolError::FrameOutOfRange { index, count });
        }

        // Duplicate frames are idempotent, like retransmitted writes.
        self.parts.entry(index).or_insert(payload);

        if self.parts.len() == count as usize {
            let message = std::mem::take(&mut self.parts)
                .into_values()
                .flatten()
                .collect();
            self.expected_count = None;
            return Ok(Some(message));
        }
        Ok(None)
    }

    /// Drop any partial state, ready for a fresh message.
    pub fn reset(&mut self) {
        self.expected_count = None;
        self.parts.clear();
    }

    pub fn frames_pending(&self) -> bool {
        !self.parts.is_empty()
    }
}

fn decode_frame(frame: &[u8]) -> Result<(u16, u16, Vec<u8>), ProtocolError> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame of {} bytes is below the {FRAME_OVERHEAD}-byte minimum",
            frame.len()
        )));
    }

    let crc_offset = frame.len() - 4;
    let declared_crc = u32::from_le_bytes([
        frame[crc_offset],
        frame[crc_offset + 1],
        frame[crc_offset + 2],
        frame[crc_offset + 3],
    ]);
    let mut hasher = Hasher::new();
    hasher.update(&frame[..crc_offset]);
    if hasher.finalize() != declared_crc {
        return Err(ProtocolError::FrameCrcMismatch);
    }

    let index = u16::from_le_bytes([frame[0], frame[1]]);
    let count = u16::from_le_bytes([frame[2], frame[3]]);
    let payload_len = u16::from_le_bytes([frame[4], frame[5]]) as usize;
    if frame.len() != FRAME_OVERHEAD + payload_len {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared payload length {payload_len} does not match frame size {}",
            frame.len()
        )));
    }

    Ok((index, count, frame[6..crc_offset].to_vec()))
}
