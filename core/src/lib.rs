// Maplink Core: BLE map artifact transfer
//
// "Does this get a verified map from the enforcement device onto the
//  fixed unit without ever corrupting the one that's already there?"
//
// If the answer is no, it doesn't belong in core.

pub mod artifact;
pub mod auth;
pub mod compress;
pub mod config;
pub mod integrity;
pub mod protocol;
pub mod storage;
pub mod transfer;

pub use artifact::MapArtifact;
pub use auth::{AuthError, AuthState, AuthenticationManager, Challenge};
pub use compress::CodecError;
pub use config::{ConfigError, TransferConfig};
pub use protocol::{Message, ProtocolEngine, ProtocolError, TransferMetadata};
pub use storage::{StorageError, StorageManager};
pub use transfer::{
    ProgressSink, TransferError, TransferProgress, TransferSession, TransferState,
};
