//! Push-model progress reporting
//!
//! The core never decides how progress is displayed or shipped; it
//! pushes updates into a `ProgressSink` the caller registers. Sinks are
//! invoked synchronously on state transitions and accepted chunks.

use super::{TransferError, TransferState};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Snapshot of transfer progress, safe to serialize into `STATUS`
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub bytes_received: u64,
    pub progress_percent: f32,
    pub transfer_rate_bps: f64,
    pub elapsed_secs: f64,
    /// Lowest absent sequence numbers, capped, so a sender can
    /// retransmit selectively.
    pub missing_chunks: Vec<u32>,
}

impl TransferProgress {
    /// Progress of a nonexistent session.
    pub fn idle() -> Self {
        Self {
            chunks_received: 0,
            total_chunks: 0,
            bytes_received: 0,
            progress_percent: 0.0,
            transfer_rate_bps: 0.0,
            elapsed_secs: 0.0,
            missing_chunks: Vec::new(),
        }
    }
}

/// Full status answer: lifecycle state plus progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub state: TransferState,
    pub progress: TransferProgress,
}

impl TransferStatus {
    pub fn idle() -> Self {
        Self {
            state: TransferState::Idle,
            progress: TransferProgress::idle(),
        }
    }
}

/// Observer for transfer lifecycle events.
///
/// Implementations must be cheap: sinks run synchronously on the
/// message-handling path.
pub trait ProgressSink {
    /// A session moved between states.
    fn state_changed(&mut self, session_id: &str, from: TransferState, to: TransferState);

    /// A chunk was accepted or the session otherwise advanced.
    fn progress(&mut self, session_id: &str, update: &TransferProgress);

    /// A session failed terminally.
    fn transfer_failed(&mut self, session_id: &str, error: &TransferError);
}

/// Default sink that forwards everything to `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn state_changed(&mut self, session_id: &str, from: TransferState, to: TransferState) {
        info!(session_id, %from, %to, "transfer state changed");
    }

    fn progress(&mut self, session_id: &str, update: &TransferProgress) {
        debug!(
            session_id,
            chunks = update.chunks_received,
            total = update.total_chunks,
            percent = update.progress_percent,
            "transfer progress"
        );
    }

    fn transfer_failed(&mut self, session_id: &str, error: &TransferError) {
        warn!(session_id, %error, "transfer failed");
    }
}
