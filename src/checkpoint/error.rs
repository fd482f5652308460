//! Checkpoint error types.

use thiserror::Error;

/// Errors that can occur while archiving or restoring the machine state.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Encoding the checkpoint to its binary form failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Decoding the checkpoint from its binary form failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Checkpoint version is not supported by this version
    #[error("Unsupported checkpoint version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The state tag does not name any known state
    #[error("Unknown state tag {0}")]
    UnknownStateTag(u8),

    /// The state is transient and may not be persisted
    #[error("State '{0}' is transient and cannot be checkpointed")]
    TransientState(&'static str),
}
