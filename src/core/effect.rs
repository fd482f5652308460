//! Side effects requested by transitions.
//!
//! Transitions are pure: instead of performing I/O they return `SideEffect`
//! values describing what the driver must do. The driver executes them on
//! its serial context (store mutations, callbacks) or spawns them
//! (collaborator calls) and feeds the completions back in as new events.

use crate::core::event::Event;
use crate::core::state::ActivationState;
use crate::error::ErrorInfo;

/// Which user-facing completion a `Callback` effect resolves.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallbackKind {
    /// Resolves pending `activate()` calls.
    Activated,
    /// Resolves pending `deactivate()` calls.
    Deactivated,
    /// Reports an OS-initiated registration update; has no pending caller.
    Updated,
}

/// An action the driver must perform after installing the next state.
#[derive(Clone, PartialEq, Debug)]
pub enum SideEffect {
    /// Create the local device identity (id and secret) if absent.
    EnsureDeviceIdentity,
    /// Begin platform push-token registration.
    RequestPushToken,
    /// Issue a fresh device registration to the service.
    IssueRegistration,
    /// Issue an update/sync registration for an already-registered device.
    IssueRegistrationSync,
    /// Issue a deregistration to the service.
    IssueDeregistration,
    /// Store the identity token issued by the service.
    PersistIdentityToken(String),
    /// Forget the stored identity token, keeping the device identity.
    ResetIdentityToken,
    /// Forget the local device identity entirely (id, secret, tokens).
    ResetDevice,
    /// Resolve a user-facing completion, with an error on failure paths.
    Callback {
        kind: CallbackKind,
        error: Option<ErrorInfo>,
    },
    /// Re-submit an event to the back of the machine's inbox.
    Enqueue(Event),
}

/// The result of a handled transition: the state to install plus the side
/// effects the driver must execute, in order.
#[derive(Clone, PartialEq, Debug)]
pub struct Outcome {
    pub next: ActivationState,
    pub effects: Vec<SideEffect>,
}

impl Outcome {
    /// A transition with no side effects.
    pub fn new(next: ActivationState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    /// A transition with side effects.
    pub fn with_effects(next: ActivationState, effects: Vec<SideEffect>) -> Self {
        Self { next, effects }
    }
}
