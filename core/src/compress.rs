//! LZ4 compression for map artifacts
//!
//! Senders compress artifacts at or above a configured size threshold;
//! the receiver decompresses transparently after hash verification.
//! Decompression is all-or-nothing: malformed input never yields a
//! partial artifact.

use thiserror::Error;

/// Codec errors
#[derive(Debug, Error, Clone)]
pub enum CodecError {
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Compress data using LZ4 with size prepend.
///
/// The prepended uncompressed size lets `decompress` allocate exactly
/// once and reject truncated input.
pub fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Sender-side helper: compress only when `data` reaches `threshold`.
///
/// Returns the (possibly compressed) bytes and whether compression was
/// applied, which the sender must declare in its transfer metadata.
pub fn maybe_compress(data: &[u8], enabled: bool, threshold: usize) -> (Vec<u8>, bool) {
    if enabled && data.len() >= threshold {
        (compress(data), true)
    } else {
        (data.to_vec(), false)
    }
}

/// Decompress data produced by `compress()`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| CodecError::DecompressionFailed(e.to_string()))
}
