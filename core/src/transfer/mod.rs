//! Transfer protocol state machine and session management
//!
//! This module provides:
//! - TransferSession: the single live chunked-transfer state machine
//! - TransferState: forward-only session lifecycle states
//! - ProgressSink: push-model observer for state and progress
//! - TransferError: everything that can go wrong with a transfer

pub mod progress;
pub mod session;

pub use progress::{LogSink, ProgressSink, TransferProgress, TransferStatus};
pub use session::{ChunkAccept, TransferSession, MISSING_REPORT_LIMIT};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transfer session lifecycle states.
///
/// States only move forward; `Failed` and `Cancelled` are terminal and
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// No session exists.
    Idle,
    /// Metadata accepted, session allocated.
    Initiated,
    /// Accepting chunks.
    Receiving,
    /// Receiving sub-state: chunks rejected, buffered data preserved.
    Paused,
    /// All chunks present; assembling and hash-checking.
    Validating,
    /// Verified artifact handed to storage.
    Completing,
    /// Artifact installed.
    Complete,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Failed | TransferState::Cancelled
        )
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Initiated => "initiated",
            TransferState::Receiving => "receiving",
            TransferState::Paused => "paused",
            TransferState::Validating => "validating",
            TransferState::Completing => "completing",
            TransferState::Complete => "complete",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// Transfer errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransferError {
    #[error("artifact too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("a transfer is already active")]
    AlreadyActive,

    #[error("invalid transfer metadata: {0}")]
    InvalidMetadata(String),

    #[error("map version {offered} is not newer than installed version {installed}")]
    VersionTooOld { offered: u64, installed: u64 },

    #[error("not accepting chunks in state {0}")]
    NotReceiving(TransferState),

    #[error("chunk {0} already received")]
    DuplicateChunk(u32),

    #[error("chunk {sequence} out of range (total {total})")]
    OutOfRange { sequence: u32, total: u32 },

    #[error("chunk rate limit exceeded, back off and retry")]
    RateLimited,

    #[error("chunk {sequence} malformed: got {got} bytes, expected {expected}")]
    MalformedChunk {
        sequence: u32,
        got: usize,
        expected: usize,
    },

    #[error("chunk {0} failed its checksum")]
    ChunkCorrupt(u32),

    #[error("{0} chunks missing at finalize")]
    IncompleteData(u32),

    #[error("assembled size {got} does not match declared size {expected}")]
    SizeMismatch { got: u64, expected: u64 },

    #[error("artifact hash does not match declared hash")]
    IntegrityMismatch,

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("artifact rejected: {0}")]
    InvalidArtifact(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("session timed out")]
    Timeout,

    #[error("cannot pause in state {0}")]
    NotPausable(TransferState),

    #[error("cannot resume in state {0}")]
    NotPaused(TransferState),

    #[error("session is terminal ({0})")]
    Terminal(TransferState),

    #[error("session not ready to finalize (state {0})")]
    NotValidating(TransferState),
}

impl TransferError {
    /// Stable wire code for `ERROR` messages.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::TooLarge { .. } => "too_large",
            TransferError::AlreadyActive => "already_active",
            TransferError::InvalidMetadata(_) => "invalid_metadata",
            TransferError::VersionTooOld { .. } => "version_too_old",
            TransferError::NotReceiving(_) => "not_receiving",
            TransferError::DuplicateChunk(_) => "duplicate_chunk",
            TransferError::OutOfRange { .. } => "chunk_out_of_range",
            TransferError::RateLimited => "rate_limited",
            TransferError::MalformedChunk { .. } => "malformed_chunk",
            TransferError::ChunkCorrupt(_) => "chunk_corrupt",
            TransferError::IncompleteData(_) => "incomplete_data",
            TransferError::SizeMismatch { .. } => "size_mismatch",
            TransferError::IntegrityMismatch => "integrity_mismatch",
            TransferError::DecompressionFailed(_) => "decompression_failed",
            TransferError::InvalidArtifact(_) => "invalid_artifact",
            TransferError::StorageFailure(_) => "storage_failure",
            TransferError::Timeout => "timeout",
            TransferError::NotPausable(_) => "not_pausable",
            TransferError::NotPaused(_) => "not_paused",
            TransferError::Terminal(_) => "session_terminal",
            TransferError::NotValidating(_) => "not_validating",
        }
    }

    /// Whether the sender can recover by retrying or retransmitting
    /// without restarting the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransferError::DuplicateChunk(_)
                | TransferError::RateLimited
                | TransferError::ChunkCorrupt(_)
                | TransferError::MalformedChunk { .. }
                | TransferError::OutOfRange { .. }
        )
    }
}
