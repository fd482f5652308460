//! Checkpoint and resume for the activation machine.
//!
//! Only checkpointable states are ever written: a process restart always
//! resumes from the last safe rest point, never from a transient state with
//! an operation in flight. The format is an explicit versioned schema
//! rather than anything reflective, so it stays stable across
//! reimplementations.

use crate::core::ActivationState;
use serde::{Deserialize, Serialize};

pub mod error;

pub use error::CheckpointError;

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

// State tags. The tag space is append-only; legacy tags stay reserved.
const TAG_NOT_ACTIVATED: u8 = 0;
const TAG_WAITING_FOR_PUSH_DEVICE_DETAILS: u8 = 1;
const TAG_WAITING_FOR_DEVICE_REGISTRATION: u8 = 2;
const TAG_WAITING_FOR_NEW_PUSH_DEVICE_DETAILS: u8 = 3;
const TAG_WAITING_FOR_REGISTRATION_SYNC: u8 = 4;
const TAG_AFTER_REGISTRATION_SYNC_FAILED: u8 = 5;
const TAG_WAITING_FOR_DEREGISTRATION: u8 = 6;
// Produced by older writers only; unarchives as AfterRegistrationSyncFailed.
const TAG_AFTER_REGISTRATION_UPDATE_FAILED: u8 = 7;

/// Serializable checkpoint of the activation machine's state.
///
/// `from_event_tag` is reserved: always `None` today, kept in the schema so
/// that checkpointing `WaitingForRegistrationSync`'s trigger, were it ever
/// allowed, would not need a version bump.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Tag of the persisted state
    pub state_tag: u8,

    /// Reserved trigger tag for the registration-sync state
    pub from_event_tag: Option<u8>,
}

/// Serialize a checkpointable state to an opaque binary blob.
///
/// Transient states are rejected: they represent an in-flight operation
/// and must never become the resume point.
pub fn archive(state: &ActivationState) -> Result<Vec<u8>, CheckpointError> {
    let state_tag = match state {
        ActivationState::NotActivated => TAG_NOT_ACTIVATED,
        ActivationState::WaitingForPushDeviceDetails => TAG_WAITING_FOR_PUSH_DEVICE_DETAILS,
        ActivationState::WaitingForNewPushDeviceDetails => TAG_WAITING_FOR_NEW_PUSH_DEVICE_DETAILS,
        ActivationState::AfterRegistrationSyncFailed => TAG_AFTER_REGISTRATION_SYNC_FAILED,
        transient => return Err(CheckpointError::TransientState(transient.name())),
    };

    let checkpoint = Checkpoint {
        version: CHECKPOINT_VERSION,
        state_tag,
        from_event_tag: None,
    };

    bincode::serialize(&checkpoint).map_err(|e| CheckpointError::SerializationFailed(e.to_string()))
}

/// Restore a state from a checkpoint blob.
///
/// The legacy `AfterRegistrationUpdateFailed` tag written by older versions
/// migrates to `AfterRegistrationSyncFailed` on load.
pub fn unarchive(bytes: &[u8]) -> Result<ActivationState, CheckpointError> {
    let checkpoint: Checkpoint = bincode::deserialize(bytes)
        .map_err(|e| CheckpointError::DeserializationFailed(e.to_string()))?;

    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            found: checkpoint.version,
            supported: CHECKPOINT_VERSION,
        });
    }

    match checkpoint.state_tag {
        TAG_NOT_ACTIVATED => Ok(ActivationState::NotActivated),
        TAG_WAITING_FOR_PUSH_DEVICE_DETAILS => Ok(ActivationState::WaitingForPushDeviceDetails),
        TAG_WAITING_FOR_NEW_PUSH_DEVICE_DETAILS => {
            Ok(ActivationState::WaitingForNewPushDeviceDetails)
        }
        TAG_AFTER_REGISTRATION_SYNC_FAILED | TAG_AFTER_REGISTRATION_UPDATE_FAILED => {
            Ok(ActivationState::AfterRegistrationSyncFailed)
        }
        TAG_WAITING_FOR_DEVICE_REGISTRATION
        | TAG_WAITING_FOR_REGISTRATION_SYNC
        | TAG_WAITING_FOR_DEREGISTRATION => Err(CheckpointError::TransientState(
            match checkpoint.state_tag {
                TAG_WAITING_FOR_DEVICE_REGISTRATION => "WaitingForDeviceRegistration",
                TAG_WAITING_FOR_REGISTRATION_SYNC => "WaitingForRegistrationSync",
                _ => "WaitingForDeregistration",
            },
        )),
        tag => Err(CheckpointError::UnknownStateTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SyncTrigger;

    #[test]
    fn checkpointable_states_roundtrip() {
        let states = [
            ActivationState::NotActivated,
            ActivationState::WaitingForPushDeviceDetails,
            ActivationState::WaitingForNewPushDeviceDetails,
            ActivationState::AfterRegistrationSyncFailed,
        ];

        for state in states {
            let bytes = archive(&state).unwrap();
            let restored = unarchive(&bytes).unwrap();
            assert_eq!(state, restored);
        }
    }

    #[test]
    fn transient_states_cannot_be_archived() {
        let states = [
            ActivationState::WaitingForDeviceRegistration,
            ActivationState::WaitingForRegistrationSync {
                triggered_by: SyncTrigger::CalledActivate,
            },
            ActivationState::WaitingForDeregistration,
        ];

        for state in states {
            assert!(matches!(
                archive(&state),
                Err(CheckpointError::TransientState(_))
            ));
        }
    }

    #[test]
    fn legacy_update_failed_tag_migrates_on_load() {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            state_tag: 7,
            from_event_tag: None,
        };
        let bytes = bincode::serialize(&checkpoint).unwrap();

        let restored = unarchive(&bytes).unwrap();
        assert_eq!(restored, ActivationState::AfterRegistrationSyncFailed);
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION + 1,
            state_tag: 0,
            from_event_tag: None,
        };
        let bytes = bincode::serialize(&checkpoint).unwrap();

        assert!(matches!(
            unarchive(&bytes),
            Err(CheckpointError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            state_tag: 200,
            from_event_tag: None,
        };
        let bytes = bincode::serialize(&checkpoint).unwrap();

        assert!(matches!(
            unarchive(&bytes),
            Err(CheckpointError::UnknownStateTag(200))
        ));
    }

    #[test]
    fn transient_tag_in_blob_is_rejected() {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            state_tag: 4,
            from_event_tag: Some(0),
        };
        let bytes = bincode::serialize(&checkpoint).unwrap();

        assert!(matches!(
            unarchive(&bytes),
            Err(CheckpointError::TransientState("WaitingForRegistrationSync"))
        ));
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(matches!(
            unarchive(&[0xff; 3]),
            Err(CheckpointError::DeserializationFailed(_))
        ));
    }
}
