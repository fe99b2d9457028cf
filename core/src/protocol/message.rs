//! Protocol message envelope
//!
//! Every message on the wire is one JSON object tagged by `type`. The
//! set of types is closed: decoding an unknown type is a decode error,
//! not a runtime fallback path. Binary fields (nonces, payloads,
//! checksums, signatures) are hex-encoded.

use super::ProtocolError;
use crate::transfer::{TransferProgress, TransferState};
use serde::{Deserialize, Serialize};

/// Metadata declared by the sender in `TRANSFER_INIT`.
///
/// The chunk count is always derived from the sizes below; it is never
/// carried on the wire, so two conflicting sources cannot exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    /// Size of the original (uncompressed) artifact in bytes.
    pub total_size: u64,
    /// Negotiated chunk size; every chunk but the last must match it.
    pub chunk_size: u32,
    /// SHA-256 of the original artifact, hex-encoded.
    pub declared_hash: String,
    /// Map schema version; must exceed the installed map's version.
    pub version: u64,
    #[serde(default)]
    pub compressed: bool,
    /// Size of the compressed payload actually on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<u64>,
    /// SHA-256 of the compressed payload, checked before decompression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_hash: Option<String>,
}

impl TransferMetadata {
    /// Bytes expected on the wire: the compressed size when compression
    /// is declared, the original size otherwise.
    pub fn wire_size(&self) -> u64 {
        if self.compressed {
            self.compressed_size.unwrap_or(self.total_size)
        } else {
            self.total_size
        }
    }

    /// Hash the assembled wire bytes must match before any
    /// decompression happens.
    pub fn wire_hash(&self) -> &str {
        if self.compressed {
            self.compressed_hash
                .as_deref()
                .unwrap_or(&self.declared_hash)
        } else {
            &self.declared_hash
        }
    }

    /// `ceil(wire_size / chunk_size)`.
    pub fn total_chunks(&self) -> u32 {
        let chunk = self.chunk_size as u64;
        ((self.wire_size() + chunk - 1) / chunk) as u32
    }
}

/// All message kinds the protocol speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Receiver → device: nonce to sign.
    AuthChallenge {
        device_id: String,
        /// Hex-encoded 128-bit nonce.
        nonce: String,
        /// Unix timestamp the challenge was issued at.
        timestamp: u64,
        /// Seconds until the challenge expires.
        expires_in: u64,
    },
    /// Device → receiver: signature over `nonce ‖ device_id ‖ timestamp`.
    AuthResponse {
        device_id: String,
        timestamp: u64,
        /// Hex-encoded Ed25519 signature.
        signature: String,
    },
    /// Device → receiver: artifact metadata, opens a session.
    TransferInit { metadata: TransferMetadata },
    /// Device → receiver: one artifact chunk.
    ChunkData {
        sequence: u32,
        /// Hex-encoded chunk bytes.
        payload: String,
        /// Hex-encoded 128-bit chunk digest.
        checksum: String,
    },
    /// Device → receiver: sender believes all chunks are delivered.
    TransferComplete,
    /// Receiver → device: state and progress snapshot.
    Status {
        state: TransferState,
        progress: TransferProgress,
    },
    /// Receiver → device: explicit rejection, never silent.
    Error { code: String, message: String },
    Pause,
    Resume,
    Cancel,
}

impl Message {
    /// Serialize to the JSON wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
    }

    /// Deserialize from the JSON wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
    }

    /// Human-readable message kind for logging.
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::AuthChallenge { .. } => "auth_challenge",
            Message::AuthResponse { .. } => "auth_response",
            Message::TransferInit { .. } => "transfer_init",
            Message::ChunkData { .. } => "chunk_data",
            Message::TransferComplete => "transfer_complete",
            Message::Status { .. } => "status",
            Message::Error { .. } => "error",
            Message::Pause => "pause",
            Message::Resume => "resume",
            Message::Cancel => "cancel",
        }
    }
}
