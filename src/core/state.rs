//! Activation states and the transition table.
//!
//! The table is a pure function over `(state, event, device snapshot)`.
//! A handled pair returns the next state plus the side effects the driver
//! must execute; an unhandled pair returns `None`, which the driver logs
//! and drops — asynchronous platform callbacks can legitimately race ahead
//! of or behind user calls, so unhandled is never an error.

use crate::core::effect::{CallbackKind, Outcome, SideEffect};
use crate::core::event::Event;
use crate::error::ErrorInfo;
use serde::{Deserialize, Serialize};

/// Which event put the machine into `WaitingForRegistrationSync`.
///
/// Decides whether completion of the sync resolves the activated callback
/// (user-initiated) or the updated callback (OS-initiated token refresh).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SyncTrigger {
    CalledActivate,
    GotPushDeviceDetails,
}

impl SyncTrigger {
    fn callback_kind(self) -> CallbackKind {
        match self {
            Self::CalledActivate => CallbackKind::Activated,
            Self::GotPushDeviceDetails => CallbackKind::Updated,
        }
    }
}

/// The view of the local device record the transition table needs.
///
/// Computed by the driver on its serial context immediately before each
/// transition, so the table itself never touches the store.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct DeviceSnapshot {
    /// An identity token is stored: the device has registered before.
    pub registered: bool,
    /// A platform push token is already known.
    pub has_push_token: bool,
    /// The stored client identity disagrees with the current session's.
    pub client_id_conflict: bool,
}

/// The current phase of the activation protocol.
///
/// Checkpointable states are safe rest points that survive a process
/// restart; transient states represent an outstanding asynchronous
/// operation and are never persisted.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ActivationState {
    /// Initial state: no activation in progress, possibly never registered.
    NotActivated,
    /// Waiting for the platform to issue a push token. May remain current
    /// indefinitely if the user never grants push permission.
    WaitingForPushDeviceDetails,
    /// A registration call is in flight.
    WaitingForDeviceRegistration,
    /// Steady "activated" state: registered, listening for token refreshes.
    WaitingForNewPushDeviceDetails,
    /// An update/sync registration call is in flight.
    WaitingForRegistrationSync { triggered_by: SyncTrigger },
    /// The last sync failed; activation can be retried or torn down.
    AfterRegistrationSyncFailed,
    /// A deregistration call is in flight.
    WaitingForDeregistration,
}

impl ActivationState {
    /// Get the state's name for logging and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotActivated => "NotActivated",
            Self::WaitingForPushDeviceDetails => "WaitingForPushDeviceDetails",
            Self::WaitingForDeviceRegistration => "WaitingForDeviceRegistration",
            Self::WaitingForNewPushDeviceDetails => "WaitingForNewPushDeviceDetails",
            Self::WaitingForRegistrationSync { .. } => "WaitingForRegistrationSync",
            Self::AfterRegistrationSyncFailed => "AfterRegistrationSyncFailed",
            Self::WaitingForDeregistration => "WaitingForDeregistration",
        }
    }

    /// Check if this state is a safe rest point that may be persisted and
    /// resumed from after a process restart.
    pub fn is_checkpointable(&self) -> bool {
        matches!(
            self,
            Self::NotActivated
                | Self::WaitingForPushDeviceDetails
                | Self::WaitingForNewPushDeviceDetails
                | Self::AfterRegistrationSyncFailed
        )
    }

    /// Apply an event, returning the next state and required side effects,
    /// or `None` if this state does not handle the event.
    pub fn transition(&self, event: &Event, device: &DeviceSnapshot) -> Option<Outcome> {
        use ActivationState as S;
        use Event as E;
        use SideEffect as Fx;

        match (self, event) {
            (S::NotActivated, E::CalledDeactivate) => {
                if device.registered {
                    Some(Outcome::with_effects(
                        S::WaitingForDeregistration,
                        vec![Fx::IssueDeregistration],
                    ))
                } else {
                    Some(Outcome::with_effects(
                        S::NotActivated,
                        vec![
                            Fx::ResetIdentityToken,
                            Fx::Callback {
                                kind: CallbackKind::Deactivated,
                                error: None,
                            },
                        ],
                    ))
                }
            }
            (S::NotActivated, E::CalledActivate) => {
                Some(validate_and_sync(SyncTrigger::CalledActivate, device))
            }
            // A token refresh before any activation is consumed silently.
            (S::NotActivated, E::GotPushDeviceDetails) => Some(Outcome::new(S::NotActivated)),

            // Duplicate activate while a token request is outstanding:
            // acknowledged, no second platform request.
            (S::WaitingForPushDeviceDetails, E::CalledActivate) => {
                Some(Outcome::new(S::WaitingForPushDeviceDetails))
            }
            (S::WaitingForPushDeviceDetails, E::CalledDeactivate) => Some(Outcome::with_effects(
                S::NotActivated,
                vec![Fx::Callback {
                    kind: CallbackKind::Deactivated,
                    error: None,
                }],
            )),
            (S::WaitingForPushDeviceDetails, E::GotPushDeviceDetails) => Some(
                Outcome::with_effects(S::WaitingForDeviceRegistration, vec![Fx::IssueRegistration]),
            ),
            (S::WaitingForPushDeviceDetails, E::GettingPushDeviceDetailsFailed { error }) => {
                Some(Outcome::with_effects(
                    S::NotActivated,
                    vec![Fx::Callback {
                        kind: CallbackKind::Activated,
                        error: Some(error.clone()),
                    }],
                ))
            }

            (S::WaitingForDeviceRegistration, E::CalledActivate) => {
                Some(Outcome::new(S::WaitingForDeviceRegistration))
            }
            (S::WaitingForDeviceRegistration, E::GotDeviceRegistration { identity_token }) => {
                let mut effects = Vec::new();
                if let Some(token) = identity_token {
                    effects.push(Fx::PersistIdentityToken(token.clone()));
                }
                effects.push(Fx::Callback {
                    kind: CallbackKind::Activated,
                    error: None,
                });
                Some(Outcome::with_effects(
                    S::WaitingForNewPushDeviceDetails,
                    effects,
                ))
            }
            (S::WaitingForDeviceRegistration, E::GettingDeviceRegistrationFailed { error }) => {
                Some(Outcome::with_effects(
                    S::NotActivated,
                    vec![Fx::Callback {
                        kind: CallbackKind::Activated,
                        error: Some(error.clone()),
                    }],
                ))
            }

            (S::WaitingForNewPushDeviceDetails, E::CalledActivate) => Some(Outcome::with_effects(
                S::WaitingForNewPushDeviceDetails,
                vec![Fx::Callback {
                    kind: CallbackKind::Activated,
                    error: None,
                }],
            )),
            (S::WaitingForNewPushDeviceDetails, E::CalledDeactivate) => Some(
                Outcome::with_effects(S::WaitingForDeregistration, vec![Fx::IssueDeregistration]),
            ),
            (S::WaitingForNewPushDeviceDetails, E::GotPushDeviceDetails) => {
                Some(Outcome::with_effects(
                    S::WaitingForRegistrationSync {
                        triggered_by: SyncTrigger::GotPushDeviceDetails,
                    },
                    vec![Fx::IssueRegistrationSync],
                ))
            }

            (S::WaitingForRegistrationSync { triggered_by }, E::CalledActivate)
                if *triggered_by != SyncTrigger::CalledActivate =>
            {
                Some(Outcome::with_effects(
                    self.clone(),
                    vec![Fx::Callback {
                        kind: CallbackKind::Activated,
                        error: None,
                    }],
                ))
            }
            (
                S::WaitingForRegistrationSync { triggered_by },
                E::RegistrationSynced { identity_token },
            ) => {
                let mut effects = Vec::new();
                if let Some(token) = identity_token {
                    effects.push(Fx::PersistIdentityToken(token.clone()));
                }
                effects.push(Fx::Callback {
                    kind: triggered_by.callback_kind(),
                    error: None,
                });
                Some(Outcome::with_effects(
                    S::WaitingForNewPushDeviceDetails,
                    effects,
                ))
            }
            (
                S::WaitingForRegistrationSync { triggered_by },
                E::SyncRegistrationFailed { error },
            ) => Some(Outcome::with_effects(
                S::AfterRegistrationSyncFailed,
                vec![Fx::Callback {
                    kind: triggered_by.callback_kind(),
                    error: Some(error.clone()),
                }],
            )),

            (S::AfterRegistrationSyncFailed, E::CalledActivate) => {
                Some(validate_and_sync(SyncTrigger::CalledActivate, device))
            }
            (S::AfterRegistrationSyncFailed, E::GotPushDeviceDetails) => {
                Some(validate_and_sync(SyncTrigger::GotPushDeviceDetails, device))
            }
            (S::AfterRegistrationSyncFailed, E::CalledDeactivate) => Some(Outcome::with_effects(
                S::WaitingForDeregistration,
                vec![Fx::IssueDeregistration],
            )),

            (S::WaitingForDeregistration, E::CalledDeactivate) => {
                Some(Outcome::new(S::WaitingForDeregistration))
            }
            (S::WaitingForDeregistration, E::Deregistered) => Some(Outcome::with_effects(
                S::NotActivated,
                vec![
                    Fx::ResetDevice,
                    Fx::Callback {
                        kind: CallbackKind::Deactivated,
                        error: None,
                    },
                ],
            )),
            // Deliberately stays put so the caller can retry deactivate().
            (S::WaitingForDeregistration, E::DeregistrationFailed { error }) => {
                Some(Outcome::with_effects(
                    S::WaitingForDeregistration,
                    vec![Fx::Callback {
                        kind: CallbackKind::Deactivated,
                        error: Some(error.clone()),
                    }],
                ))
            }

            _ => None,
        }
    }
}

/// Shared activation entry point for `NotActivated.CalledActivate` and
/// `AfterRegistrationSyncFailed.{CalledActivate, GotPushDeviceDetails}`.
///
/// A previously registered device goes straight to an update/sync (or fails
/// fast on a client-identity conflict). An unregistered device (re)starts
/// platform token registration, replaying an already-known push token so
/// registration proceeds without waiting on the platform.
fn validate_and_sync(trigger: SyncTrigger, device: &DeviceSnapshot) -> Outcome {
    use SideEffect as Fx;

    if device.registered {
        if device.client_id_conflict {
            return Outcome::with_effects(
                ActivationState::WaitingForRegistrationSync {
                    triggered_by: trigger,
                },
                vec![Fx::Enqueue(Event::SyncRegistrationFailed {
                    error: ErrorInfo::client_id_mismatch(),
                })],
            );
        }
        return Outcome::with_effects(
            ActivationState::WaitingForRegistrationSync {
                triggered_by: trigger,
            },
            vec![Fx::IssueRegistrationSync],
        );
    }

    let mut effects = Vec::new();
    if device.has_push_token {
        effects.push(Fx::Enqueue(Event::GotPushDeviceDetails));
    }
    effects.push(Fx::EnsureDeviceIdentity);
    effects.push(Fx::RequestPushToken);
    Outcome::with_effects(ActivationState::WaitingForPushDeviceDetails, effects)
}
