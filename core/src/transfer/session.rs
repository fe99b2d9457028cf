//! The transfer session state machine
//!
//! One `TransferSession` exists per transfer attempt. Chunks may arrive
//! out of order, duplicated, or corrupted; the session stores each
//! distinct valid chunk exactly once, enforces a sliding one-second
//! rate window, and moves to `Validating` the moment the last chunk
//! lands. `finalize` re-checks completeness independently of the
//! counter, verifies the declared hash (twice for compressed
//! transfers), and yields the artifact bytes for installation.
//!
//! Invariant: `received_count()` equals the number of distinct chunks
//! stored; the store is the counter's single source of truth.

use super::{TransferError, TransferProgress, TransferState};
use crate::compress;
use crate::config::{TransferConfig, MAX_CHARACTERISTIC_SIZE};
use crate::integrity;
use crate::protocol::TransferMetadata;
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cap on how many missing sequence numbers are reported at once.
pub const MISSING_REPORT_LIMIT: usize = 10;

/// Result of an accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAccept {
    pub sequence: u32,
    pub received: u32,
    pub total: u32,
    /// True when this chunk was the last one and the session moved to
    /// `Validating`.
    pub complete: bool,
}

/// State for one map transfer attempt.
pub struct TransferSession {
    session_id: String,
    state: TransferState,
    metadata: TransferMetadata,
    total_chunks: u32,
    chunk_size: usize,
    chunk_store: BTreeMap<u32, Vec<u8>>,
    bytes_received: u64,
    created_at: Instant,
    last_activity: Instant,
    rate_window: VecDeque<Instant>,
    max_chunks_per_second: u32,
    session_timeout: Duration,
}

impl TransferSession {
    /// Allocate a session in `Initiated` after validating the metadata
    /// against configured limits.
    pub fn new(metadata: TransferMetadata, config: &TransferConfig) -> Result<Self, TransferError> {
        if metadata.total_size == 0 {
            return Err(TransferError::InvalidMetadata(
                "total_size must be > 0".to_string(),
            ));
        }
        let chunk_size = metadata.chunk_size as usize;
        if chunk_size == 0 || chunk_size > MAX_CHARACTERISTIC_SIZE {
            return Err(TransferError::InvalidMetadata(format!(
                "chunk_size {chunk_size} outside 1-{MAX_CHARACTERISTIC_SIZE}"
            )));
        }
        if metadata.declared_hash.len() != 64 || hex::decode(&metadata.declared_hash).is_err() {
            return Err(TransferError::InvalidMetadata(
                "declared_hash must be 64 hex characters".to_string(),
            ));
        }
        if metadata.compressed {
            let Some(size) = metadata.compressed_size else {
                return Err(TransferError::InvalidMetadata(
                    "compressed transfer missing compressed_size".to_string(),
                ));
            };
            if size == 0 {
                return Err(TransferError::InvalidMetadata(
                    "compressed_size must be > 0".to_string(),
                ));
            }
            match &metadata.compressed_hash {
                Some(hash) if hash.len() == 64 && hex::decode(hash).is_ok() => {}
                Some(_) => {
                    return Err(TransferError::InvalidMetadata(
                        "compressed_hash must be 64 hex characters".to_string(),
                    ));
                }
                None => {
                    return Err(TransferError::InvalidMetadata(
                        "compressed transfer missing compressed_hash".to_string(),
                    ));
                }
            }
        }

        let max = config.max_transfer_size as u64;
        if metadata.total_size > max {
            return Err(TransferError::TooLarge {
                size: metadata.total_size,
                max,
            });
        }
        let wire_size = metadata.wire_size();
        if wire_size > max {
            return Err(TransferError::TooLarge {
                size: wire_size,
                max,
            });
        }

        // Derived here and nowhere else: the wire never carries a
        // trusted chunk count.
        let total_chunks = metadata.total_chunks();

        let now = Instant::now();
        let session = Self {
            session_id: Uuid::new_v4().to_string(),
            state: TransferState::Initiated,
            metadata,
            total_chunks,
            chunk_size,
            chunk_store: BTreeMap::new(),
            bytes_received: 0,
            created_at: now,
            last_activity: now,
            rate_window: VecDeque::new(),
            max_chunks_per_second: config.max_chunks_per_second,
            session_timeout: config.session_timeout,
        };
        info!(
            session_id = %session.session_id,
            total_chunks,
            wire_size,
            compressed = session.metadata.compressed,
            "transfer session created"
        );
        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn received_count(&self) -> u32 {
        self.chunk_store.len() as u32
    }

    /// Move from `Initiated` to `Receiving`.
    pub fn activate(&mut self) -> Result<(), TransferError> {
        if self.state != TransferState::Initiated {
            return Err(TransferError::NotReceiving(self.state));
        }
        self.transition(TransferState::Receiving);
        Ok(())
    }

    /// Ingest one chunk.
    ///
    /// Check order matters for failure locality: cheap structural
    /// rejections first, then the checksum, then the rate limiter, so
    /// only chunks that would otherwise be accepted count against the
    /// rate window.
    pub fn receive_chunk(
        &mut self,
        sequence: u32,
        payload: &[u8],
        checksum_hex: &str,
    ) -> Result<ChunkAccept, TransferError> {
        let now = Instant::now();
        if self.expire_if_stale(now) {
            return Err(TransferError::Timeout);
        }
        if self.state != TransferState::Receiving {
            return Err(TransferError::NotReceiving(self.state));
        }
        if sequence >= self.total_chunks {
            return Err(TransferError::OutOfRange {
                sequence,
                total: self.total_chunks,
            });
        }
        if self.chunk_store.contains_key(&sequence) {
            debug!(session_id = %self.session_id, sequence, "duplicate chunk ignored");
            return Err(TransferError::DuplicateChunk(sequence));
        }

        let expected = self.expected_chunk_size(sequence);
        if payload.len() != expected {
            return Err(TransferError::MalformedChunk {
                sequence,
                got: payload.len(),
                expected,
            });
        }
        if !integrity::verify_chunk(payload, checksum_hex) {
            warn!(session_id = %self.session_id, sequence, "chunk checksum mismatch");
            return Err(TransferError::ChunkCorrupt(sequence));
        }

        while let Some(front) = self.rate_window.front() {
            if now.duration_since(*front) >= Duration::from_secs(1) {
                self.rate_window.pop_front();
            } else {
                break;
            }
        }
        if self.max_chunks_per_second > 0
            && self.rate_window.len() >= self.max_chunks_per_second as usize
        {
            return Err(TransferError::RateLimited);
        }

        self.bytes_received += payload.len() as u64;
        self.chunk_store.insert(sequence, payload.to_vec());
        self.last_activity = now;
        self.rate_window.push_back(now);

        let received = self.received_count();
        let complete = received == self.total_chunks;
        if complete {
            self.transition(TransferState::Validating);
        }

        Ok(ChunkAccept {
            sequence,
            received,
            total: self.total_chunks,
            complete,
        })
    }

    /// `Receiving → Paused`. Buffered chunks are preserved.
    pub fn pause(&mut self) -> Result<(), TransferError> {
        if self.expire_if_stale(Instant::now()) {
            return Err(TransferError::Timeout);
        }
        if self.state != TransferState::Receiving {
            return Err(TransferError::NotPausable(self.state));
        }
        self.transition(TransferState::Paused);
        Ok(())
    }

    /// `Paused → Receiving`. Returns the first window of missing
    /// chunks so the sender knows where to pick up.
    pub fn resume(&mut self) -> Result<Vec<u32>, TransferError> {
        let now = Instant::now();
        if self.expire_if_stale(now) {
            return Err(TransferError::Timeout);
        }
        if self.state != TransferState::Paused {
            return Err(TransferError::NotPaused(self.state));
        }
        self.transition(TransferState::Receiving);
        self.last_activity = now;
        Ok(self.missing_chunks(MISSING_REPORT_LIMIT))
    }

    /// Cancel from any non-terminal state, discarding buffered chunks.
    pub fn cancel(&mut self) -> Result<(), TransferError> {
        if self.state.is_terminal() {
            return Err(TransferError::Terminal(self.state));
        }
        self.transition(TransferState::Cancelled);
        self.release_buffers();
        Ok(())
    }

    /// Assemble, verify, and (if needed) decompress the artifact.
    ///
    /// Gap detection here walks every expected sequence number, an
    /// authoritative completeness check independent of the chunk
    /// counter. On success the session is left in `Completing` and the
    /// verified bytes are returned for installation.
    pub fn finalize(&mut self) -> Result<Vec<u8>, TransferError> {
        if self.state != TransferState::Validating {
            return Err(TransferError::NotValidating(self.state));
        }

        let wire_size = self.metadata.wire_size();
        let mut assembled = Vec::with_capacity(wire_size as usize);
        let mut missing = 0u32;
        for sequence in 0..self.total_chunks {
            match self.chunk_store.get(&sequence) {
                Some(chunk) => assembled.extend_from_slice(chunk),
                None => missing += 1,
            }
        }
        if missing > 0 {
            return self.fail(TransferError::IncompleteData(missing));
        }
        if assembled.len() as u64 != wire_size {
            return self.fail(TransferError::SizeMismatch {
                got: assembled.len() as u64,
                expected: wire_size,
            });
        }

        if integrity::artifact_hash_hex(&assembled) != self.metadata.wire_hash() {
            return self.fail(TransferError::IntegrityMismatch);
        }

        let artifact = if self.metadata.compressed {
            let decompressed = match compress::decompress(&assembled) {
                Ok(bytes) => bytes,
                Err(err) => {
                    return self.fail(TransferError::DecompressionFailed(err.to_string()))
                }
            };
            if decompressed.len() as u64 != self.metadata.total_size {
                return self.fail(TransferError::SizeMismatch {
                    got: decompressed.len() as u64,
                    expected: self.metadata.total_size,
                });
            }
            if integrity::artifact_hash_hex(&decompressed) != self.metadata.declared_hash {
                return self.fail(TransferError::IntegrityMismatch);
            }
            decompressed
        } else {
            assembled
        };

        self.transition(TransferState::Completing);
        self.release_buffers();
        Ok(artifact)
    }

    /// `Completing → Complete`, after storage reports success.
    pub fn mark_complete(&mut self) -> Result<(), TransferError> {
        if self.state != TransferState::Completing {
            return Err(TransferError::NotValidating(self.state));
        }
        self.transition(TransferState::Complete);
        Ok(())
    }

    /// Terminal failure injected by the owner (storage or artifact
    /// validation failures).
    pub fn fail_with(&mut self, error: &TransferError) {
        warn!(session_id = %self.session_id, %error, "transfer session failed");
        if !self.state.is_terminal() {
            self.transition(TransferState::Failed);
        }
        self.release_buffers();
    }

    /// Fail the session if it idled past the timeout. Returns true when
    /// the timeout fired (now or previously through this path).
    pub fn expire_if_stale(&mut self, now: Instant) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if now.duration_since(self.last_activity) > self.session_timeout {
            warn!(
                session_id = %self.session_id,
                idle_secs = now.duration_since(self.last_activity).as_secs(),
                "session timed out"
            );
            self.transition(TransferState::Failed);
            self.release_buffers();
            return true;
        }
        false
    }

    /// Lowest `limit` sequence numbers not yet received.
    pub fn missing_chunks(&self, limit: usize) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|sequence| !self.chunk_store.contains_key(sequence))
            .take(limit)
            .collect()
    }

    /// Pure status snapshot; never mutates.
    pub fn progress(&self) -> TransferProgress {
        let elapsed = self.created_at.elapsed().as_secs_f64();
        let percent = if self.total_chunks > 0 {
            (self.received_count() as f32 / self.total_chunks as f32) * 100.0
        } else {
            0.0
        };
        let rate = if elapsed > 0.0 {
            self.bytes_received as f64 / elapsed
        } else {
            0.0
        };
        TransferProgress {
            chunks_received: self.received_count(),
            total_chunks: self.total_chunks,
            bytes_received: self.bytes_received,
            progress_percent: percent,
            transfer_rate_bps: rate,
            elapsed_secs: elapsed,
            missing_chunks: if self.state.is_terminal() {
                Vec::new()
            } else {
                self.missing_chunks(MISSING_REPORT_LIMIT)
            },
        }
    }

    fn expected_chunk_size(&self, sequence: u32) -> usize {
        if sequence + 1 == self.total_chunks {
            let remainder = (self.metadata.wire_size() % self.chunk_size as u64) as usize;
            if remainder > 0 {
                remainder
            } else {
                self.chunk_size
            }
        } else {
            self.chunk_size
        }
    }

    fn fail(&mut self, error: TransferError) -> Result<Vec<u8>, TransferError> {
        self.fail_with(&error);
        Err(error)
    }

    fn transition(&mut self, to: TransferState) {
        debug!(session_id = %self.session_id, from = %self.state, %to, "state transition");
        self.state = to;
    }

    fn release_buffers(&mut self) {
        self.chunk_store.clear();
        self.rate_window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::chunk_checksum_hex;

    fn make_metadata(payload: &[u8], chunk_size: u32) -> TransferMetadata {
        TransferMetadata {
            total_size: payload.len() as u64,
            chunk_size,
            declared_hash: integrity::artifact_hash_hex(payload),
            version: 1,
            compressed: false,
            compressed_size: None,
            compressed_hash: None,
        }
    }

    fn unlimited_config() -> TransferConfig {
        TransferConfig {
            max_chunks_per_second: 0,
            ..TransferConfig::default()
        }
    }

    fn make_session(payload: &[u8], chunk_size: u32) -> TransferSession {
        let mut session = TransferSession::new(make_metadata(payload, chunk_size), &unlimited_config())
            .expect("session must be created");
        session.activate().expect("activation from Initiated");
        session
    }

    fn chunks_of(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
        payload.chunks(chunk_size).map(|c| c.to_vec()).collect()
    }

    fn send(session: &mut TransferSession, sequence: u32, chunk: &[u8]) -> Result<ChunkAccept, TransferError> {
        session.receive_chunk(sequence, chunk, &chunk_checksum_hex(chunk))
    }

    #[test]
    fn test_in_order_reassembly() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);
        assert_eq!(session.total_chunks(), 8);

        for (i, chunk) in chunks.iter().enumerate() {
            let accept = send(&mut session, i as u32, chunk).expect("chunk must be accepted");
            assert_eq!(accept.received, i as u32 + 1);
        }
        assert_eq!(session.state(), TransferState::Validating);
        assert_eq!(session.finalize().expect("finalize"), payload);
        assert_eq!(session.state(), TransferState::Completing);
    }

    #[test]
    fn test_reversed_order_reassembly() {
        let payload: Vec<u8> = (0..900u32).map(|i| (i % 256) as u8).collect();
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);

        for (i, chunk) in chunks.iter().enumerate().rev() {
            send(&mut session, i as u32, chunk).expect("out-of-order chunk must be accepted");
        }
        assert_eq!(session.finalize().expect("finalize"), payload);
    }

    #[test]
    fn test_duplicate_chunk_is_nonfatal() {
        let payload = vec![9u8; 300];
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);

        send(&mut session, 0, &chunks[0]).expect("first copy accepted");
        assert_eq!(
            send(&mut session, 0, &chunks[0]),
            Err(TransferError::DuplicateChunk(0))
        );
        // Counter unchanged, session still receiving.
        assert_eq!(session.received_count(), 1);
        assert_eq!(session.state(), TransferState::Receiving);
    }

    #[test]
    fn test_tampered_chunk_rejected_without_counting() {
        let payload = vec![1u8; 256];
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);

        let good_checksum = chunk_checksum_hex(&chunks[0]);
        let mut tampered = chunks[0].clone();
        tampered[7] ^= 0xFF;

        assert_eq!(
            session.receive_chunk(0, &tampered, &good_checksum),
            Err(TransferError::ChunkCorrupt(0))
        );
        assert_eq!(session.received_count(), 0);

        // The same chunk retransmitted intact is accepted.
        send(&mut session, 0, &chunks[0]).expect("retransmission accepted");
        assert_eq!(session.received_count(), 1);
    }

    #[test]
    fn test_out_of_range_sequence_rejected() {
        let payload = vec![2u8; 256];
        let mut session = make_session(&payload, 128);
        assert!(matches!(
            send(&mut session, 2, &[0u8; 128]),
            Err(TransferError::OutOfRange { sequence: 2, total: 2 })
        ));
    }

    #[test]
    fn test_wrong_size_interior_chunk_rejected() {
        let payload = vec![3u8; 300];
        let mut session = make_session(&payload, 128);
        let short = vec![3u8; 100];
        assert!(matches!(
            send(&mut session, 0, &short),
            Err(TransferError::MalformedChunk {
                sequence: 0,
                got: 100,
                expected: 128
            })
        ));
    }

    #[test]
    fn test_final_chunk_must_match_remainder() {
        let payload = vec![4u8; 300]; // chunks: 128, 128, 44
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);
        assert_eq!(chunks[2].len(), 44);

        // A full-size final chunk is malformed.
        assert!(matches!(
            send(&mut session, 2, &[4u8; 128]),
            Err(TransferError::MalformedChunk { .. })
        ));
        send(&mut session, 2, &chunks[2]).expect("remainder-sized final chunk accepted");
    }

    #[test]
    fn test_rate_limit_sliding_window() {
        let payload = vec![5u8; 128 * 20];
        let config = TransferConfig {
            max_chunks_per_second: 10,
            ..TransferConfig::default()
        };
        let mut session =
            TransferSession::new(make_metadata(&payload, 128), &config).expect("session");
        session.activate().expect("activate");
        let chunks = chunks_of(&payload, 128);

        let mut accepted = 0;
        let mut limited = 0;
        for (i, chunk) in chunks.iter().take(15).enumerate() {
            match send(&mut session, i as u32, chunk) {
                Ok(_) => accepted += 1,
                Err(TransferError::RateLimited) => limited += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(limited, 5);
        assert_eq!(session.received_count(), 10);
    }

    #[test]
    fn test_rate_limited_chunk_can_be_retried_after_window() {
        let payload = vec![6u8; 128 * 12];
        let config = TransferConfig {
            max_chunks_per_second: 10,
            ..TransferConfig::default()
        };
        let mut session =
            TransferSession::new(make_metadata(&payload, 128), &config).expect("session");
        session.activate().expect("activate");
        let chunks = chunks_of(&payload, 128);

        for (i, chunk) in chunks.iter().take(10).enumerate() {
            send(&mut session, i as u32, chunk).expect("within budget");
        }
        assert_eq!(
            send(&mut session, 10, &chunks[10]),
            Err(TransferError::RateLimited)
        );

        std::thread::sleep(Duration::from_millis(1100));
        send(&mut session, 10, &chunks[10]).expect("accepted after window slides");
    }

    #[test]
    fn test_pause_blocks_chunks_and_resume_reports_missing() {
        let payload = vec![7u8; 128 * 4];
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);

        send(&mut session, 1, &chunks[1]).expect("chunk 1");
        session.pause().expect("pause from receiving");
        assert_eq!(session.state(), TransferState::Paused);

        assert!(matches!(
            send(&mut session, 0, &chunks[0]),
            Err(TransferError::NotReceiving(TransferState::Paused))
        ));
        // Buffered data preserved across pause.
        assert_eq!(session.received_count(), 1);

        let missing = session.resume().expect("resume from paused");
        assert_eq!(missing, vec![0, 2, 3]);
        send(&mut session, 0, &chunks[0]).expect("receiving again");
    }

    #[test]
    fn test_pause_resume_invalid_states() {
        let payload = vec![8u8; 128];
        let mut session = make_session(&payload, 128);
        assert!(matches!(session.resume(), Err(TransferError::NotPaused(_))));
        session.pause().expect("pause");
        assert!(matches!(session.pause(), Err(TransferError::NotPausable(_))));
    }

    #[test]
    fn test_cancel_discards_data() {
        let payload = vec![9u8; 128 * 3];
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);
        send(&mut session, 0, &chunks[0]).expect("chunk 0");

        session.cancel().expect("cancel from receiving");
        assert_eq!(session.state(), TransferState::Cancelled);
        assert_eq!(session.received_count(), 0);
        assert!(matches!(session.cancel(), Err(TransferError::Terminal(_))));
    }

    #[test]
    fn test_integrity_mismatch_fails_session() {
        let payload = vec![10u8; 256];
        let mut metadata = make_metadata(&payload, 128);
        metadata.declared_hash = integrity::artifact_hash_hex(b"some other artifact");
        let mut session =
            TransferSession::new(metadata, &unlimited_config()).expect("session");
        session.activate().expect("activate");

        for (i, chunk) in chunks_of(&payload, 128).iter().enumerate() {
            send(&mut session, i as u32, chunk).expect("chunk accepted");
        }
        assert_eq!(session.finalize(), Err(TransferError::IntegrityMismatch));
        assert_eq!(session.state(), TransferState::Failed);
    }

    #[test]
    fn test_compressed_transfer_roundtrip() {
        let original: Vec<u8> = b"{\"zones\": []}".repeat(500);
        let compressed = compress::compress(&original);
        let metadata = TransferMetadata {
            total_size: original.len() as u64,
            chunk_size: 128,
            declared_hash: integrity::artifact_hash_hex(&original),
            version: 1,
            compressed: true,
            compressed_size: Some(compressed.len() as u64),
            compressed_hash: Some(integrity::artifact_hash_hex(&compressed)),
        };
        let mut session =
            TransferSession::new(metadata, &unlimited_config()).expect("session");
        session.activate().expect("activate");

        for (i, chunk) in compressed.chunks(128).enumerate() {
            send(&mut session, i as u32, chunk).expect("chunk accepted");
        }
        assert_eq!(session.finalize().expect("finalize"), original);
    }

    #[test]
    fn test_compressed_transfer_bad_inner_hash() {
        let original = b"real artifact".repeat(200);
        let compressed = compress::compress(&original);
        let metadata = TransferMetadata {
            total_size: original.len() as u64,
            chunk_size: 128,
            // Outer (wire) hash is right; inner declared hash is wrong.
            declared_hash: integrity::artifact_hash_hex(b"forged"),
            version: 1,
            compressed: true,
            compressed_size: Some(compressed.len() as u64),
            compressed_hash: Some(integrity::artifact_hash_hex(&compressed)),
        };
        let mut session =
            TransferSession::new(metadata, &unlimited_config()).expect("session");
        session.activate().expect("activate");

        for (i, chunk) in compressed.chunks(128).enumerate() {
            send(&mut session, i as u32, chunk).expect("chunk accepted");
        }
        assert_eq!(session.finalize(), Err(TransferError::IntegrityMismatch));
    }

    #[test]
    fn test_session_timeout_fails_session() {
        let payload = vec![11u8; 256];
        let config = TransferConfig {
            max_chunks_per_second: 0,
            session_timeout: Duration::from_millis(50),
            ..TransferConfig::default()
        };
        let mut session =
            TransferSession::new(make_metadata(&payload, 128), &config).expect("session");
        session.activate().expect("activate");

        std::thread::sleep(Duration::from_millis(80));
        let chunks = chunks_of(&payload, 128);
        assert_eq!(
            send(&mut session, 0, &chunks[0]),
            Err(TransferError::Timeout)
        );
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(session.received_count(), 0);
    }

    #[test]
    fn test_too_large_rejected() {
        let config = TransferConfig::default();
        let metadata = TransferMetadata {
            total_size: config.max_transfer_size as u64 + 1,
            chunk_size: 128,
            declared_hash: integrity::artifact_hash_hex(b"x"),
            version: 1,
            compressed: false,
            compressed_size: None,
            compressed_hash: None,
        };
        assert!(matches!(
            TransferSession::new(metadata, &config),
            Err(TransferError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_compressed_metadata_requires_both_fields() {
        let original = b"zones".repeat(100);
        let compressed = compress::compress(&original);
        let base = TransferMetadata {
            total_size: original.len() as u64,
            chunk_size: 128,
            declared_hash: integrity::artifact_hash_hex(&original),
            version: 1,
            compressed: true,
            compressed_size: Some(compressed.len() as u64),
            compressed_hash: Some(integrity::artifact_hash_hex(&compressed)),
        };

        let missing_size = TransferMetadata {
            compressed_size: None,
            ..base.clone()
        };
        assert!(matches!(
            TransferSession::new(missing_size, &unlimited_config()),
            Err(TransferError::InvalidMetadata(_))
        ));

        let missing_hash = TransferMetadata {
            compressed_hash: None,
            ..base.clone()
        };
        assert!(matches!(
            TransferSession::new(missing_hash, &unlimited_config()),
            Err(TransferError::InvalidMetadata(_))
        ));

        let bad_hash = TransferMetadata {
            compressed_hash: Some("zz".repeat(32)),
            ..base.clone()
        };
        assert!(matches!(
            TransferSession::new(bad_hash, &unlimited_config()),
            Err(TransferError::InvalidMetadata(_))
        ));

        // The complete form is still accepted.
        TransferSession::new(base, &unlimited_config()).expect("valid compressed metadata");
    }

    #[test]
    fn test_counter_matches_store() {
        let payload = vec![12u8; 128 * 5];
        let mut session = make_session(&payload, 128);
        let chunks = chunks_of(&payload, 128);

        for (i, chunk) in chunks.iter().enumerate().take(3) {
            send(&mut session, i as u32, chunk).expect("chunk");
            let _ = send(&mut session, i as u32, chunk); // duplicate
        }
        assert_eq!(session.received_count(), 3);
        assert_eq!(session.missing_chunks(10), vec![3, 4]);
    }
}
