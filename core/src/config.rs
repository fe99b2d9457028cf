//! Transfer protocol configuration
//!
//! All knobs the surrounding transport layer may set:
//! - Chunking and size limits
//! - Rate limiting and retry behavior
//! - Compression threshold
//! - Authentication and session timeouts
//! - Backup retention

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Largest write a single BLE characteristic can carry.
pub const MAX_CHARACTERISTIC_SIZE: usize = 512;

/// Default artifact chunk size, tuned for BLE throughput.
pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Default ceiling on the whole map artifact (5MB).
pub const DEFAULT_MAX_TRANSFER_SIZE: usize = 5 * 1024 * 1024;

/// Errors that can occur during configuration validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid chunk_size: must be 1-{MAX_CHARACTERISTIC_SIZE}, got {0}")]
    InvalidChunkSize(usize),

    #[error("invalid max_transfer_size: must be > 0")]
    InvalidMaxTransferSize,

    #[error("invalid max_backups: must be >= 1, got {0}")]
    InvalidMaxBackups(usize),

    #[error("invalid max_auth_attempts: must be >= 1, got {0}")]
    InvalidMaxAuthAttempts(u32),

    #[error("compression_threshold {threshold} exceeds max_transfer_size {max}")]
    ThresholdAboveMax { threshold: usize, max: usize },
}

/// Configuration for the transfer protocol core.
///
/// `max_chunks_per_second == 0` disables rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of one artifact chunk in bytes (every chunk but the last).
    pub chunk_size: usize,
    /// Hard ceiling on the (wire) artifact size.
    pub max_transfer_size: usize,
    /// Chunks accepted per trailing 1-second window; 0 = unlimited.
    pub max_chunks_per_second: u32,
    /// Retransmission attempts the sender is advised to make per chunk.
    pub retry_attempts: u32,
    /// Advised delay between sender retransmissions.
    pub retry_delay: Duration,
    /// Whether senders should compress artifacts above the threshold.
    pub compression_enabled: bool,
    /// Minimum artifact size before compression is applied.
    pub compression_threshold: usize,
    /// How long an issued challenge stays valid.
    pub auth_timeout: Duration,
    /// Failed verification attempts before a device is locked out.
    pub max_auth_attempts: u32,
    /// Lock-out period after `max_auth_attempts` failures.
    pub auth_cooldown: Duration,
    /// Accepted clock skew on response timestamps.
    pub clock_skew_tolerance: Duration,
    /// Whether signatures on auth responses are verified.
    pub required_signature: bool,
    /// Idle time after which a live session is failed and swept.
    pub session_timeout: Duration,
    /// Backup map files retained by the storage manager.
    pub max_backups: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            max_chunks_per_second: 10,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            compression_enabled: true,
            compression_threshold: 1024 * 1024,
            auth_timeout: Duration::from_secs(30),
            max_auth_attempts: 3,
            auth_cooldown: Duration::from_secs(60),
            clock_skew_tolerance: Duration::from_secs(30),
            required_signature: true,
            session_timeout: Duration::from_secs(600),
            max_backups: 5,
        }
    }
}

impl TransferConfig {
    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHARACTERISTIC_SIZE {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.max_transfer_size == 0 {
            return Err(ConfigError::InvalidMaxTransferSize);
        }
        if self.max_backups == 0 {
            return Err(ConfigError::InvalidMaxBackups(self.max_backups));
        }
        if self.max_auth_attempts == 0 {
            return Err(ConfigError::InvalidMaxAuthAttempts(self.max_auth_attempts));
        }
        if self.compression_threshold > self.max_transfer_size {
            return Err(ConfigError::ThresholdAboveMax {
                threshold: self.compression_threshold,
                max: self.max_transfer_size,
            });
        }
        Ok(())
    }
}
