//! Integrity validation: per-chunk and whole-artifact digests
//!
//! Two layers of protection:
//! - A fast 128-bit BLAKE3 digest per chunk catches in-flight corruption
//!   before the chunk is stored, so the sender can retransmit just that
//!   chunk.
//! - A SHA-256 digest over the fully assembled artifact, compared
//!   byte-exact against the sender-declared hash.

use sha2::{Digest, Sha256};

/// Length of the truncated per-chunk digest in bytes (128 bits).
pub const CHUNK_DIGEST_LEN: usize = 16;

/// Fast per-chunk digest: BLAKE3 truncated to 128 bits.
pub fn chunk_checksum(payload: &[u8]) -> [u8; CHUNK_DIGEST_LEN] {
    let hash = blake3::hash(payload);
    let mut digest = [0u8; CHUNK_DIGEST_LEN];
    digest.copy_from_slice(&hash.as_bytes()[..CHUNK_DIGEST_LEN]);
    digest
}

/// Hex form of the per-chunk digest, as carried in `CHUNK_DATA` messages.
pub fn chunk_checksum_hex(payload: &[u8]) -> String {
    hex::encode(chunk_checksum(payload))
}

/// Check a chunk payload against its hex-encoded declared checksum.
///
/// A malformed hex string counts as a mismatch.
pub fn verify_chunk(payload: &[u8], declared_hex: &str) -> bool {
    match hex::decode(declared_hex) {
        Ok(declared) => declared == chunk_checksum(payload),
        Err(_) => false,
    }
}

/// Cryptographic whole-artifact digest (SHA-256).
pub fn artifact_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hex form of the whole-artifact digest, as declared in `TRANSFER_INIT`.
pub fn artifact_hash_hex(bytes: &[u8]) -> String {
    hex::encode(artifact_hash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_checksum_is_128_bit() {
        let digest = chunk_checksum(b"some chunk payload");
        assert_eq!(digest.len(), 16);
        assert_eq!(chunk_checksum_hex(b"some chunk payload").len(), 32);
    }

    #[test]
    fn test_chunk_checksum_deterministic() {
        assert_eq!(chunk_checksum(b"abc"), chunk_checksum(b"abc"));
        assert_ne!(chunk_checksum(b"abc"), chunk_checksum(b"abd"));
    }

    #[test]
    fn test_verify_chunk_accepts_matching_digest() {
        let payload = b"payload under test";
        let declared = chunk_checksum_hex(payload);
        assert!(verify_chunk(payload, &declared));
    }

    #[test]
    fn test_verify_chunk_rejects_tampered_payload() {
        let payload = b"payload under test".to_vec();
        let declared = chunk_checksum_hex(&payload);

        let mut tampered = payload.clone();
        tampered[3] ^= 0xFF;
        assert!(!verify_chunk(&tampered, &declared));
    }

    #[test]
    fn test_verify_chunk_rejects_bad_hex() {
        assert!(!verify_chunk(b"data", "not hex at all"));
        assert!(!verify_chunk(b"data", ""));
    }

    #[test]
    fn test_artifact_hash_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            artifact_hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_artifact_hash_sensitive_to_single_byte() {
        let a = artifact_hash(b"map artifact v1");
        let b = artifact_hash(b"map artifact v2");
        assert_ne!(a, b);
    }
}
