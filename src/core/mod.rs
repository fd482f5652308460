//! Core activation types and transition logic.
//!
//! This module contains the pure functional core of the activation machine:
//! - Events: the closed set of stimuli, as data
//! - States: the activation phases and the full transition table
//! - Side effects: data values describing the work a transition requires
//! - History: immutable archival of handled transitions
//!
//! All logic in this module is pure (no side effects), following the
//! "pure core, imperative shell" philosophy: I/O lives in the driver.

mod effect;
mod event;
mod history;
mod state;

pub use effect::{CallbackKind, Outcome, SideEffect};
pub use event::Event;
pub use history::{StateHistory, TransitionRecord};
pub use state::{ActivationState, DeviceSnapshot, SyncTrigger};
