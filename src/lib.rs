//! Device push-activation state machine for a pub/sub messaging SDK.
//!
//! This crate owns the subsystem that moves a device (or app instance)
//! through "not activated → registering → activated → deregistering" while
//! coordinating two asynchronous processes it does not control: the OS
//! push-token issuance and the messaging service's device-registration API.
//! It survives process restarts mid-sequence and tolerates duplicate or
//! out-of-order activate/deactivate calls and token deliveries.
//!
//! # Core Concepts
//!
//! - **Events**: every stimulus — user call, OS callback, network
//!   completion — is an immutable [`core::Event`] value
//! - **States**: the activation phases, with a pure transition table that
//!   returns the next state plus [`core::SideEffect`] data values
//! - **Driver**: [`ActivationMachine`] serializes event delivery on one
//!   tokio task, persists checkpointable states, and executes side effects
//! - **Checkpoints**: a process restart resumes from the last safe rest
//!   point via the versioned [`checkpoint`] schema
//!
//! # Example
//!
//! ```rust,no_run
//! use push_activation::{ActivationMachine, MemoryDeviceStore, NoopHandler};
//! use std::sync::Arc;
//!
//! # use push_activation::{ErrorInfo, LocalDevice, PushToken};
//! # use async_trait::async_trait;
//! # struct Registrar;
//! # #[async_trait]
//! # impl push_activation::RegistrationClient for Registrar {
//! #     async fn register(&self, _: &LocalDevice) -> Result<Option<String>, ErrorInfo> { Ok(None) }
//! #     async fn update(&self, _: &LocalDevice) -> Result<Option<String>, ErrorInfo> { Ok(None) }
//! #     async fn deregister(&self, _: &LocalDevice) -> Result<(), ErrorInfo> { Ok(()) }
//! # }
//! # struct Platform;
//! # #[async_trait]
//! # impl push_activation::PushTokenProvider for Platform {
//! #     async fn request_push_token(&self) -> Result<PushToken, ErrorInfo> {
//! #         Ok(PushToken { transport: "apns".into(), token: "t".into() })
//! #     }
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let machine = ActivationMachine::spawn(
//!     Arc::new(MemoryDeviceStore::new()),
//!     Arc::new(Registrar),
//!     Arc::new(Platform),
//!     Arc::new(NoopHandler),
//!     Some("client-1".into()),
//! )?;
//!
//! machine.activate().await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod core;
pub mod device;
pub mod error;
pub mod machine;
pub mod ports;

// Re-export commonly used types
pub use crate::core::{ActivationState, Event, SideEffect};
pub use device::{
    DeviceStore, FsDeviceStore, IdentityTokenDetails, LocalDevice, MemoryDeviceStore, PushToken,
    StoreError,
};
pub use error::{ActivationError, ErrorInfo};
pub use machine::{ActivationMachine, InspectReport};
pub use ports::{ActivationHandler, NoopHandler, PushTokenProvider, RegistrationClient};
