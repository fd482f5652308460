//! Error payloads and crate-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code raised when the stored device's client identity disagrees
/// with the active session's client identity.
pub const CLIENT_ID_MISMATCH: u32 = 61002;

/// Error code used when the platform declines to issue a push token.
pub const PUSH_TOKEN_DENIED: u32 = 61001;

/// Error payload carried by events and delivered through user callbacks.
///
/// Transport and platform errors are surfaced verbatim from the
/// collaborator that produced them; the identity-conflict error is
/// synthesized inside the validate-and-sync procedure.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Error)]
#[error("activation error {code}: {message}")]
pub struct ErrorInfo {
    /// Service-defined error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorInfo {
    /// Create an error payload from a code and message.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The synchronous identity-conflict error raised by validate-and-sync.
    pub fn client_id_mismatch() -> Self {
        Self::new(
            CLIENT_ID_MISMATCH,
            "stored device client identity does not match the current session",
        )
    }
}

/// Errors returned by the machine's public API.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The operation completed with an error reported by the service or platform.
    #[error(transparent)]
    Failed(#[from] ErrorInfo),

    /// The machine's event loop has stopped and can no longer accept input.
    #[error("activation machine has stopped")]
    Stopped,

    /// The device store failed while loading or saving.
    #[error(transparent)]
    Store(#[from] crate::device::StoreError),
}
