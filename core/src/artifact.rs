//! Map artifact schema validation
//!
//! A verified transfer only becomes the active map if its bytes parse
//! as the expected JSON shape: a `metadata` object carrying an integer
//! `version`, and a `zones` array. Downstream consumers rely on both.

use crate::integrity;
use serde_json::Value;
use thiserror::Error;

/// Artifact validation errors
#[derive(Debug, Error, Clone)]
pub enum ArtifactError {
    #[error("artifact is not valid UTF-8 JSON: {0}")]
    NotJson(String),

    #[error("artifact missing required field: {0}")]
    MissingField(&'static str),

    #[error("artifact metadata.version must be an unsigned integer")]
    BadVersion,

    #[error("artifact zones must be an array")]
    BadZones,
}

/// A fully reassembled, hash-verified, schema-validated map.
#[derive(Debug, Clone)]
pub struct MapArtifact {
    /// Raw artifact bytes, exactly as they will be installed.
    bytes: Vec<u8>,
    /// Schema version from `metadata.version`.
    version: u64,
    /// SHA-256 over `bytes`, hex-encoded.
    hash: String,
}

impl MapArtifact {
    /// Validate artifact bytes and take ownership of them.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, ArtifactError> {
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| ArtifactError::NotJson(e.to_string()))?;

        let metadata = value
            .get("metadata")
            .ok_or(ArtifactError::MissingField("metadata"))?;
        let version = metadata
            .get("version")
            .ok_or(ArtifactError::MissingField("metadata.version"))?
            .as_u64()
            .ok_or(ArtifactError::BadVersion)?;

        let zones = value
            .get("zones")
            .ok_or(ArtifactError::MissingField("zones"))?;
        if !zones.is_array() {
            return Err(ArtifactError::BadZones);
        }

        let hash = integrity::artifact_hash_hex(&bytes);
        Ok(Self {
            bytes,
            version,
            hash,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Extract `metadata.version` from raw map bytes, if present.
///
/// Used to version-gate incoming transfers against the installed map.
/// Unreadable or unversioned content yields `None` (treated as version 0
/// by callers), never an error.
pub fn map_version(bytes: &[u8]) -> Option<u64> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("metadata")?.get("version")?.as_u64()
}
