//! Collaborator interfaces around the activation core.
//!
//! The machine drives these; it never cares how they are implemented. The
//! registration client wraps the service's device-registration API, the
//! push-token provider wraps the platform's push service, and the handler
//! receives the user-facing completions. Results come back as events, so
//! implementations may complete from any thread or callback context.

use crate::device::{LocalDevice, PushToken};
use crate::error::ErrorInfo;
use async_trait::async_trait;

/// The service's device-registration API.
///
/// All calls are asynchronous; the driver translates each result into the
/// corresponding event (`GotDeviceRegistration`, `RegistrationSynced`,
/// `Deregistered`, or their failure counterparts).
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Register a new device. Returns the identity token on success.
    async fn register(&self, device: &LocalDevice) -> Result<Option<String>, ErrorInfo>;

    /// Update the registration of an already-registered device.
    async fn update(&self, device: &LocalDevice) -> Result<Option<String>, ErrorInfo>;

    /// Remove the device's registration.
    async fn deregister(&self, device: &LocalDevice) -> Result<(), ErrorInfo>;
}

/// The platform's push-token issuance.
///
/// May take arbitrarily long: the user might never grant push permission,
/// and the machine is designed to wait indefinitely.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    /// Request a push token from the OS push service.
    async fn request_push_token(&self) -> Result<PushToken, ErrorInfo>;
}

/// User-facing completion hooks.
///
/// `activated` and `deactivated` also resolve any pending `activate()` /
/// `deactivate()` futures; `updated` has no pending caller — it reports the
/// outcome of an OS-initiated registration sync. Each hook fires at most
/// once per corresponding external call.
pub trait ActivationHandler: Send + Sync {
    /// Activation settled, successfully if `error` is `None`.
    fn activated(&self, _error: Option<&ErrorInfo>) {}

    /// Deactivation settled, successfully if `error` is `None`.
    fn deactivated(&self, _error: Option<&ErrorInfo>) {}

    /// An OS-initiated registration update settled.
    fn updated(&self, _error: Option<&ErrorInfo>) {}
}

/// Handler that ignores every completion.
pub struct NoopHandler;

impl ActivationHandler for NoopHandler {}
