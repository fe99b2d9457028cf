//! Protocol engine: the single owner of protocol state
//!
//! The engine turns each inbound message into exactly one reply, never
//! silence. It owns the authentication manager, at most one live
//! transfer session, and the storage manager; the surrounding transport
//! feeds it decoded messages and ships whatever it returns. Everything
//! here is synchronous: the caller drives `sweep_stale` periodically to
//! expire idle sessions and stale challenges.

use super::{Message, ProtocolError, TransferMetadata};
use crate::artifact::MapArtifact;
use crate::auth::{AuthError, AuthenticationManager};
use crate::config::{ConfigError, TransferConfig};
use crate::storage::StorageManager;
use crate::transfer::{
    ProgressSink, TransferError, TransferSession, TransferState, TransferStatus,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Drives the transfer protocol for one fixed receiver unit.
pub struct ProtocolEngine {
    config: TransferConfig,
    auth: AuthenticationManager,
    session: Option<TransferSession>,
    storage: StorageManager,
    sink: Box<dyn ProgressSink>,
}

impl ProtocolEngine {
    /// Build an engine from a validated configuration.
    pub fn new(
        config: TransferConfig,
        storage: StorageManager,
        sink: Box<dyn ProgressSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let auth = AuthenticationManager::new(&config);
        Ok(Self {
            config,
            auth,
            session: None,
            storage,
            sink,
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthenticationManager {
        &self.auth
    }

    pub fn auth_mut(&mut self) -> &mut AuthenticationManager {
        &mut self.auth
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Issue an authentication challenge for a newly connected device.
    pub fn begin_authentication(&mut self, device_id: &str) -> Result<Message, AuthError> {
        let challenge = self.auth.generate_challenge(device_id)?;
        Ok(Message::AuthChallenge {
            device_id: challenge.device_id.clone(),
            nonce: hex::encode(challenge.nonce),
            timestamp: challenge.issued_unix(),
            expires_in: self.config.auth_timeout.as_secs(),
        })
    }

    /// Process one inbound message from `device_id` and produce the
    /// reply to send back.
    ///
    /// Every transfer operation is gated on authentication first; an
    /// unauthenticated request is rejected without touching session
    /// state.
    pub fn handle_message(&mut self, device_id: &str, message: Message) -> Message {
        debug!(device_id, kind = message.message_type(), "handling message");
        match message {
            Message::AuthResponse {
                device_id: claimed,
                timestamp,
                signature,
            } => self.on_auth_response(device_id, &claimed, timestamp, &signature),

            Message::TransferInit { metadata } => self.on_transfer_init(device_id, metadata),

            Message::ChunkData {
                sequence,
                payload,
                checksum,
            } => self.on_chunk(device_id, sequence, &payload, &checksum),

            Message::TransferComplete => self.on_transfer_complete(device_id),

            Message::Pause => self.on_pause(device_id),
            Message::Resume => self.on_resume(device_id),
            Message::Cancel => self.on_cancel(device_id),

            // Receiver-originated kinds arriving inbound are a protocol
            // violation, answered explicitly like everything else.
            Message::AuthChallenge { .. } | Message::Status { .. } | Message::Error { .. } => {
                warn!(device_id, "unexpected receiver-originated message");
                error_reply("unexpected_message", "message kind not accepted inbound")
            }
        }
    }

    /// Expire stale authentication state and time out an idle session.
    /// Terminal sessions are released so a new transfer can start.
    pub fn sweep_stale(&mut self) {
        self.auth.sweep_expired();

        if let Some(session) = self.session.as_mut() {
            let before = session.state();
            if session.expire_if_stale(Instant::now()) {
                let id = session.session_id().to_string();
                self.sink
                    .state_changed(&id, before, TransferState::Failed);
                self.sink.transfer_failed(&id, &TransferError::Timeout);
            }
        }
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.state().is_terminal())
        {
            self.session = None;
        }
    }

    /// Current transfer status; `Idle` when no session exists.
    pub fn transfer_status(&self) -> TransferStatus {
        match &self.session {
            Some(session) => TransferStatus {
                state: session.state(),
                progress: session.progress(),
            },
            None => TransferStatus::idle(),
        }
    }

    // ========================================================================
    // Message handlers
    // ========================================================================

    fn on_auth_response(
        &mut self,
        device_id: &str,
        claimed: &str,
        timestamp: u64,
        signature_hex: &str,
    ) -> Message {
        if claimed != device_id {
            warn!(device_id, claimed, "auth response device mismatch");
            return error_reply("device_mismatch", "response device does not match link");
        }
        let signature = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => {
                let err = AuthError::Malformed("signature is not valid hex".to_string());
                return error_reply(err.code(), &err.to_string());
            }
        };
        match self.auth.verify_response(device_id, timestamp, &signature) {
            Ok(()) => self.status_reply(),
            Err(err) => error_reply(err.code(), &err.to_string()),
        }
    }

    fn on_transfer_init(&mut self, device_id: &str, metadata: TransferMetadata) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        if self
            .session
            .as_ref()
            .is_some_and(|s| !s.state().is_terminal())
        {
            let err = TransferError::AlreadyActive;
            return error_reply(err.code(), &err.to_string());
        }

        let installed = self.storage.installed_version();
        if metadata.version <= installed {
            let err = TransferError::VersionTooOld {
                offered: metadata.version,
                installed,
            };
            info!(device_id, offered = metadata.version, installed, "transfer refused");
            return error_reply(err.code(), &err.to_string());
        }

        let mut session = match TransferSession::new(metadata, &self.config) {
            Ok(session) => session,
            Err(err) => return error_reply(err.code(), &err.to_string()),
        };
        let id = session.session_id().to_string();
        self.sink
            .state_changed(&id, TransferState::Idle, TransferState::Initiated);

        if let Err(err) = session.activate() {
            return error_reply(err.code(), &err.to_string());
        }
        self.sink
            .state_changed(&id, TransferState::Initiated, TransferState::Receiving);

        self.session = Some(session);
        self.status_reply()
    }

    fn on_chunk(
        &mut self,
        device_id: &str,
        sequence: u32,
        payload_hex: &str,
        checksum_hex: &str,
    ) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        if self.session.is_none() {
            return error_reply("no_active_transfer", "no transfer session is active");
        }
        let payload = match hex::decode(payload_hex) {
            Ok(bytes) => bytes,
            Err(_) => {
                return error_reply("malformed_chunk", "chunk payload is not valid hex");
            }
        };

        let (accept, before) = {
            // Scoped so the session borrow ends before sink and storage
            // are touched.
            let Some(session) = self.session.as_mut() else {
                return error_reply("no_active_transfer", "no transfer session is active");
            };
            let before = session.state();
            (session.receive_chunk(sequence, &payload, checksum_hex), before)
        };

        match accept {
            Ok(accept) if accept.complete => self.complete_transfer(),
            Ok(_) => {
                if let Some(session) = self.session.as_ref() {
                    self.sink
                        .progress(session.session_id(), &session.progress());
                }
                self.status_reply()
            }
            Err(err) => {
                // Only a rejection that actually killed the session (a
                // timeout firing on this call) is a terminal failure;
                // state-guard rejections leave it alive and resumable.
                if let Some(session) = self.session.as_ref() {
                    if session.state().is_terminal() && !before.is_terminal() {
                        let id = session.session_id().to_string();
                        self.sink
                            .state_changed(&id, before, TransferState::Failed);
                        self.sink.transfer_failed(&id, &err);
                    }
                }
                error_reply(err.code(), &err.to_string())
            }
        }
    }

    fn on_transfer_complete(&mut self, device_id: &str) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        let Some(session) = self.session.as_ref() else {
            return error_reply("no_active_transfer", "no transfer session is active");
        };
        match session.state() {
            TransferState::Validating => self.complete_transfer(),
            TransferState::Receiving | TransferState::Paused => {
                let missing = session.total_chunks() - session.received_count();
                let err = TransferError::IncompleteData(missing);
                error_reply(err.code(), &err.to_string())
            }
            TransferState::Complete => self.status_reply(),
            other => error_reply("not_validating", &format!("cannot complete in state {other}")),
        }
    }

    fn on_pause(&mut self, device_id: &str) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        let result = {
            let Some(session) = self.session.as_mut() else {
                return error_reply("no_active_transfer", "no transfer session is active");
            };
            session.pause().map(|_| session.session_id().to_string())
        };
        match result {
            Ok(id) => {
                self.sink
                    .state_changed(&id, TransferState::Receiving, TransferState::Paused);
                self.status_reply()
            }
            Err(err) => error_reply(err.code(), &err.to_string()),
        }
    }

    fn on_resume(&mut self, device_id: &str) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        let result = {
            let Some(session) = self.session.as_mut() else {
                return error_reply("no_active_transfer", "no transfer session is active");
            };
            session.resume().map(|_| session.session_id().to_string())
        };
        match result {
            Ok(id) => {
                self.sink
                    .state_changed(&id, TransferState::Paused, TransferState::Receiving);
                // The status reply carries the missing-chunk window so
                // the sender knows where to pick up.
                self.status_reply()
            }
            Err(err) => error_reply(err.code(), &err.to_string()),
        }
    }

    fn on_cancel(&mut self, device_id: &str) -> Message {
        if !self.auth.is_authenticated(device_id) {
            return unauthenticated_reply(device_id);
        }
        let result = {
            let Some(session) = self.session.as_mut() else {
                return error_reply("no_active_transfer", "no transfer session is active");
            };
            let before = session.state();
            session
                .cancel()
                .map(|_| (session.session_id().to_string(), before))
        };
        match result {
            Ok((id, before)) => {
                self.sink
                    .state_changed(&id, before, TransferState::Cancelled);
                let reply = self.status_reply();
                self.session = None;
                reply
            }
            Err(err) => error_reply(err.code(), &err.to_string()),
        }
    }

    /// Finalize the session, validate the artifact, and install it.
    /// Failures in any stage fail the session and produce an explicit
    /// error reply; the previously active map is untouched.
    fn complete_transfer(&mut self) -> Message {
        let (id, declared_version, finalized) = {
            let Some(session) = self.session.as_mut() else {
                return error_reply("no_active_transfer", "no transfer session is active");
            };
            let id = session.session_id().to_string();
            let declared_version = session.metadata().version;
            (id, declared_version, session.finalize())
        };

        let bytes = match finalized {
            Ok(bytes) => {
                self.sink
                    .state_changed(&id, TransferState::Validating, TransferState::Completing);
                bytes
            }
            Err(err) => {
                self.sink
                    .state_changed(&id, TransferState::Validating, TransferState::Failed);
                self.sink.transfer_failed(&id, &err);
                return error_reply(err.code(), &err.to_string());
            }
        };

        let artifact = match MapArtifact::parse(bytes) {
            Ok(artifact) => artifact,
            Err(err) => {
                let err = TransferError::InvalidArtifact(err.to_string());
                return self.fail_completing(&id, err);
            }
        };

        // The version gate at init trusted the declared metadata; the
        // content itself has to agree before it becomes the active map.
        if artifact.version() != declared_version {
            let err = TransferError::InvalidArtifact(format!(
                "artifact carries version {}, metadata declared {declared_version}",
                artifact.version()
            ));
            return self.fail_completing(&id, err);
        }

        if let Err(err) = self.storage.install(artifact.bytes()) {
            let err = TransferError::StorageFailure(err.to_string());
            return self.fail_completing(&id, err);
        }

        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.mark_complete() {
                return error_reply(err.code(), &err.to_string());
            }
        }
        self.sink
            .state_changed(&id, TransferState::Completing, TransferState::Complete);
        info!(session_id = %id, version = artifact.version(), "map transfer complete");
        self.status_reply()
    }

    fn fail_completing(&mut self, id: &str, err: TransferError) -> Message {
        if let Some(session) = self.session.as_mut() {
            session.fail_with(&err);
        }
        self.sink
            .state_changed(id, TransferState::Completing, TransferState::Failed);
        self.sink.transfer_failed(id, &err);
        error_reply(err.code(), &err.to_string())
    }

    fn status_reply(&self) -> Message {
        let status = self.transfer_status();
        Message::Status {
            state: status.state,
            progress: status.progress,
        }
    }
}

fn unauthenticated_reply(device_id: &str) -> Message {
    warn!(device_id, "request from unauthenticated device rejected");
    let err = ProtocolError::Unauthenticated(device_id.to_string());
    error_reply(err.code(), &err.to_string())
}

fn error_reply(code: &str, message: &str) -> Message {
    Message::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}
