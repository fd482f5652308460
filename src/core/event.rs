//! Activation events: the closed set of stimuli fed into the machine.
//!
//! Every external happening — a user call, an OS token delivery, a network
//! completion — is converted into one of these immutable values before it
//! reaches the transition table. Events are data, not behavior, so the
//! table stays total and testable without any I/O.

use crate::error::ErrorInfo;
use serde::{Deserialize, Serialize};

/// A stimulus delivered to the activation state machine.
///
/// Events carry at most one payload: an error, or an optional identity
/// token issued by the service on successful registration. Push tokens are
/// written to the local device record before `GotPushDeviceDetails` is
/// dispatched, so the event itself stays payload-free.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Event {
    /// The user called `activate()`.
    CalledActivate,
    /// The user called `deactivate()`.
    CalledDeactivate,
    /// The platform delivered a push token (already stored on the device).
    GotPushDeviceDetails,
    /// The platform failed to issue a push token.
    GettingPushDeviceDetailsFailed { error: ErrorInfo },
    /// The service registered the device.
    GotDeviceRegistration { identity_token: Option<String> },
    /// The service rejected the registration.
    GettingDeviceRegistrationFailed { error: ErrorInfo },
    /// The service accepted a registration update.
    RegistrationSynced { identity_token: Option<String> },
    /// The service rejected a registration update.
    SyncRegistrationFailed { error: ErrorInfo },
    /// The service removed the device registration.
    Deregistered,
    /// The service failed to remove the registration.
    DeregistrationFailed { error: ErrorInfo },
}

impl Event {
    /// Get the event's name for logging and diagnostics archival.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CalledActivate => "CalledActivate",
            Self::CalledDeactivate => "CalledDeactivate",
            Self::GotPushDeviceDetails => "GotPushDeviceDetails",
            Self::GettingPushDeviceDetailsFailed { .. } => "GettingPushDeviceDetailsFailed",
            Self::GotDeviceRegistration { .. } => "GotDeviceRegistration",
            Self::GettingDeviceRegistrationFailed { .. } => "GettingDeviceRegistrationFailed",
            Self::RegistrationSynced { .. } => "RegistrationSynced",
            Self::SyncRegistrationFailed { .. } => "SyncRegistrationFailed",
            Self::Deregistered => "Deregistered",
            Self::DeregistrationFailed { .. } => "DeregistrationFailed",
        }
    }

    /// The error payload, if this event carries one.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::GettingPushDeviceDetailsFailed { error }
            | Self::GettingDeviceRegistrationFailed { error }
            | Self::SyncRegistrationFailed { error }
            | Self::DeregistrationFailed { error } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_is_stable() {
        assert_eq!(Event::CalledActivate.name(), "CalledActivate");
        assert_eq!(
            Event::GotDeviceRegistration {
                identity_token: Some("tok".into())
            }
            .name(),
            "GotDeviceRegistration"
        );
        assert_eq!(Event::Deregistered.name(), "Deregistered");
    }

    #[test]
    fn error_payload_is_exposed() {
        let err = ErrorInfo::new(50000, "boom");
        let event = Event::SyncRegistrationFailed { error: err.clone() };
        assert_eq!(event.error(), Some(&err));
        assert_eq!(Event::CalledActivate.error(), None);
    }

    #[test]
    fn event_serializes_correctly() {
        let event = Event::RegistrationSynced {
            identity_token: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
