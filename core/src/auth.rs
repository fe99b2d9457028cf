//! Mutual challenge-response authentication
//!
//! Protocol flow:
//! 1. Receiver issues a 128-bit random nonce with a deadline.
//! 2. Enforcement device signs `nonce ‖ device_id ‖ timestamp` with its
//!    Ed25519 key.
//! 3. Receiver verifies the signature under the registered public key,
//!    checks the timestamp skew window, and consumes the nonce.
//!
//! Every nonce is one-time use (replay protection). Repeated failures
//! lock the device out until a cool-down elapses. No transfer message
//! is processed for a device that is not authenticated.

use crate::config::TransferConfig;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

/// Nonce length in bytes (128 bits).
pub const NONCE_LEN: usize = 16;

/// Authentication errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("a challenge is already pending for device {0}")]
    AlreadyPending(String),

    #[error("no challenge outstanding for device {0}")]
    NoChallenge(String),

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("nonce already consumed")]
    NonceReplayed,

    #[error("response timestamp outside skew tolerance")]
    ClockSkew,

    #[error("no trusted key registered for device {0}")]
    UnknownDevice(String),

    #[error("signature verification failed")]
    BadSignature,

    #[error("malformed auth response: {0}")]
    Malformed(String),

    #[error("too many failed attempts for device {0}")]
    TooManyAttempts(String),

    #[error("device {0} is in cool-down after failed attempts")]
    CoolingDown(String),
}

impl AuthError {
    /// Stable wire code for `ERROR` messages.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AlreadyPending(_) => "challenge_pending",
            AuthError::NoChallenge(_) => "no_challenge",
            AuthError::ChallengeExpired => "challenge_expired",
            AuthError::NonceReplayed => "nonce_replayed",
            AuthError::ClockSkew => "clock_skew",
            AuthError::UnknownDevice(_) => "unknown_device",
            AuthError::BadSignature => "bad_signature",
            AuthError::Malformed(_) => "malformed_response",
            AuthError::TooManyAttempts(_) => "too_many_attempts",
            AuthError::CoolingDown(_) => "cooling_down",
        }
    }
}

/// Per-device authentication state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No challenge has been issued.
    Unchallenged,
    /// A challenge is outstanding and unexpired.
    Challenged,
    /// The device proved possession of its signing key.
    Authenticated,
    /// The last challenge failed or expired.
    Rejected,
}

/// An outstanding challenge for one device.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub device_id: String,
    pub nonce: [u8; NONCE_LEN],
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
}

impl Challenge {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    /// Unix timestamp the challenge was issued at, for the wire message.
    pub fn issued_unix(&self) -> u64 {
        unix_secs(self.issued_at)
    }
}

/// A device that has completed the challenge-response exchange.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub device_id: String,
    pub authenticated: bool,
    pub expires_at: SystemTime,
}

#[derive(Debug, Default)]
struct AttemptTracker {
    failures: u32,
    cooldown_until: Option<SystemTime>,
}

/// Owns all authentication state: pending challenges, authenticated
/// sessions, consumed nonces, and per-device attempt counters.
pub struct AuthenticationManager {
    required_signature: bool,
    auth_timeout: Duration,
    max_attempts: u32,
    cooldown: Duration,
    skew_tolerance: Duration,
    session_ttl: Duration,
    trusted_keys: HashMap<String, VerifyingKey>,
    pending: HashMap<String, Challenge>,
    sessions: HashMap<String, AuthenticatedSession>,
    consumed_nonces: HashSet<[u8; NONCE_LEN]>,
    attempts: HashMap<String, AttemptTracker>,
}

impl AuthenticationManager {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            required_signature: config.required_signature,
            auth_timeout: config.auth_timeout,
            max_attempts: config.max_auth_attempts,
            cooldown: config.auth_cooldown,
            skew_tolerance: config.clock_skew_tolerance,
            session_ttl: config.session_timeout,
            trusted_keys: HashMap::new(),
            pending: HashMap::new(),
            sessions: HashMap::new(),
            consumed_nonces: HashSet::new(),
            attempts: HashMap::new(),
        }
    }

    /// Register the Ed25519 verifying key for a device. Responses from
    /// unregistered devices are rejected while signatures are required.
    pub fn register_key(&mut self, device_id: impl Into<String>, key: VerifyingKey) {
        self.trusted_keys.insert(device_id.into(), key);
    }

    /// The payload a device must sign: `nonce ‖ device_id ‖ timestamp`.
    pub fn signed_payload(nonce: &[u8; NONCE_LEN], device_id: &str, timestamp: u64) -> Vec<u8> {
        let mut payload = Vec::with_capacity(NONCE_LEN + device_id.len() + 8);
        payload.extend_from_slice(nonce);
        payload.extend_from_slice(device_id.as_bytes());
        payload.extend_from_slice(&timestamp.to_be_bytes());
        payload
    }

    /// Issue a fresh challenge for `device_id`.
    ///
    /// Fails if the device is cooling down after exhausting its
    /// attempts, or if an unexpired challenge is already outstanding.
    /// An expired outstanding challenge is silently replaced.
    pub fn generate_challenge(&mut self, device_id: &str) -> Result<Challenge, AuthError> {
        let now = SystemTime::now();

        if let Some(tracker) = self.attempts.get(device_id) {
            if let Some(until) = tracker.cooldown_until {
                if now < until {
                    warn!(device_id, "challenge refused: device in cool-down");
                    return Err(AuthError::CoolingDown(device_id.to_string()));
                }
            }
        }

        if let Some(existing) = self.pending.get(device_id) {
            if !existing.is_expired(now) {
                return Err(AuthError::AlreadyPending(device_id.to_string()));
            }
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let challenge = Challenge {
            device_id: device_id.to_string(),
            nonce,
            issued_at: now,
            expires_at: now + self.auth_timeout,
        };
        self.pending.insert(device_id.to_string(), challenge.clone());

        info!(device_id, "auth challenge issued");
        Ok(challenge)
    }

    /// Verify a signed challenge response.
    ///
    /// The outstanding challenge is consumed whether verification
    /// succeeds or fails: a nonce is usable exactly once. On success the
    /// device is marked authenticated until the session TTL elapses. On
    /// failure the per-device attempt counter advances, and exhausting
    /// it starts the cool-down.
    pub fn verify_response(
        &mut self,
        device_id: &str,
        timestamp: u64,
        signature: &[u8],
    ) -> Result<(), AuthError> {
        let now = SystemTime::now();

        if let Some(tracker) = self.attempts.get(device_id) {
            if let Some(until) = tracker.cooldown_until {
                if now < until {
                    return Err(AuthError::CoolingDown(device_id.to_string()));
                }
            }
        }

        let challenge = self
            .pending
            .remove(device_id)
            .ok_or_else(|| AuthError::NoChallenge(device_id.to_string()))?;

        let result = self.check_response(&challenge, device_id, timestamp, signature, now);
        match &result {
            Ok(()) => {
                self.consumed_nonces.insert(challenge.nonce);
                self.attempts.remove(device_id);
                self.sessions.insert(
                    device_id.to_string(),
                    AuthenticatedSession {
                        device_id: device_id.to_string(),
                        authenticated: true,
                        expires_at: now + self.session_ttl,
                    },
                );
                info!(device_id, "device authenticated");
            }
            Err(err) => {
                self.consumed_nonces.insert(challenge.nonce);
                warn!(device_id, error = %err, "auth verification failed");
                return Err(self.record_failure(device_id, now, err.clone()));
            }
        }
        result
    }

    fn check_response(
        &self,
        challenge: &Challenge,
        device_id: &str,
        timestamp: u64,
        signature: &[u8],
        now: SystemTime,
    ) -> Result<(), AuthError> {
        if challenge.is_expired(now) {
            return Err(AuthError::ChallengeExpired);
        }
        if self.consumed_nonces.contains(&challenge.nonce) {
            return Err(AuthError::NonceReplayed);
        }

        let now_unix = unix_secs(now);
        let skew = now_unix.abs_diff(timestamp);
        if skew > self.skew_tolerance.as_secs() {
            return Err(AuthError::ClockSkew);
        }

        if self.required_signature {
            let key = self
                .trusted_keys
                .get(device_id)
                .ok_or_else(|| AuthError::UnknownDevice(device_id.to_string()))?;

            let sig_bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| AuthError::Malformed("signature must be 64 bytes".to_string()))?;
            let sig = Signature::from_bytes(&sig_bytes);

            let payload = Self::signed_payload(&challenge.nonce, device_id, timestamp);
            key.verify(&payload, &sig)
                .map_err(|_| AuthError::BadSignature)?;
        }

        Ok(())
    }

    fn record_failure(&mut self, device_id: &str, now: SystemTime, err: AuthError) -> AuthError {
        let tracker = self.attempts.entry(device_id.to_string()).or_default();
        tracker.failures += 1;

        if tracker.failures >= self.max_attempts {
            tracker.cooldown_until = Some(now + self.cooldown);
            tracker.failures = 0;
            warn!(device_id, "max auth attempts exceeded, cool-down started");
            return AuthError::TooManyAttempts(device_id.to_string());
        }
        err
    }

    /// Pure query: is `device_id` authenticated right now?
    pub fn is_authenticated(&self, device_id: &str) -> bool {
        match self.sessions.get(device_id) {
            Some(session) => session.authenticated && SystemTime::now() < session.expires_at,
            None => false,
        }
    }

    /// Current state of the per-device authentication machine.
    pub fn state(&self, device_id: &str) -> AuthState {
        let now = SystemTime::now();
        if self.is_authenticated(device_id) {
            return AuthState::Authenticated;
        }
        if let Some(challenge) = self.pending.get(device_id) {
            if !challenge.is_expired(now) {
                return AuthState::Challenged;
            }
            return AuthState::Rejected;
        }
        if self.sessions.contains_key(device_id) || self.attempts.contains_key(device_id) {
            return AuthState::Rejected;
        }
        AuthState::Unchallenged
    }

    /// Drop expired challenges and sessions. Driven by the surrounding
    /// event loop alongside the transfer stale sweep.
    pub fn sweep_expired(&mut self) {
        let now = SystemTime::now();
        self.pending.retain(|_, challenge| !challenge.is_expired(now));
        self.sessions.retain(|device_id, session| {
            let live = now < session.expires_at;
            if !live {
                info!(device_id, "authenticated session expired");
            }
            live
        });
    }

    /// Invalidate any session and pending challenge for a device.
    pub fn invalidate(&mut self, device_id: &str) {
        self.pending.remove(device_id);
        self.sessions.remove(device_id);
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
