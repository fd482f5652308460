//! The state-machine driver: the imperative shell around the pure core.
//!
//! The driver owns the current state and the local device record, and
//! serializes all event delivery through one inbox drained by a single
//! tokio task: at most one `transition` call is ever in flight, which is
//! what makes the table sound without any locking inside it. Asynchronous
//! side effects (registration calls, platform token requests) run on
//! spawned tasks and re-submit their completions as new inputs, so they
//! are re-serialized no matter what context they complete on.

use crate::checkpoint;
use crate::core::{
    ActivationState, CallbackKind, DeviceSnapshot, Event, Outcome, SideEffect, StateHistory,
    TransitionRecord,
};
use crate::device::{DeviceStore, IdentityTokenDetails, LocalDevice, PushToken};
use crate::error::{ActivationError, ErrorInfo};
use crate::ports::{ActivationHandler, PushTokenProvider, RegistrationClient};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

type Waiter = oneshot::Sender<Result<(), ErrorInfo>>;

/// Everything the driver accepts through its serial inbox.
enum Input {
    /// `activate()` was called; the waiter resolves with the outcome.
    Activate(Waiter),
    /// `deactivate()` was called; the waiter resolves with the outcome.
    Deactivate(Waiter),
    /// The platform issued a push token.
    PushTokenIssued(PushToken),
    /// The platform failed to issue a push token.
    PushTokenFailed(ErrorInfo),
    /// A collaborator completion or replayed event.
    Event(Event),
    /// Diagnostics snapshot request.
    Inspect(oneshot::Sender<InspectReport>),
}

/// Point-in-time diagnostics snapshot of the machine.
#[derive(Clone, Debug)]
pub struct InspectReport {
    /// The current activation state.
    pub state: ActivationState,
    /// A copy of the local device record.
    pub device: LocalDevice,
    /// The transitions handled since the machine started.
    pub history: StateHistory,
}

/// Handle to a running activation machine.
///
/// Construct one explicitly at client startup with [`ActivationMachine::spawn`];
/// the machine resumes from its last checkpointable state. Handles are cheap
/// to clone; the driver task stops once every handle is dropped.
#[derive(Clone)]
pub struct ActivationMachine {
    inbox: mpsc::UnboundedSender<Input>,
}

impl ActivationMachine {
    /// Load the persisted device record and checkpoint, then start the
    /// driver task.
    ///
    /// `client_id` is the client identity of the current session, checked
    /// against the stored device's identity during validate-and-sync. A
    /// corrupt or unreadable checkpoint blob is discarded with a warning
    /// and the machine starts over from `NotActivated`.
    pub fn spawn(
        store: Arc<dyn DeviceStore>,
        registrar: Arc<dyn RegistrationClient>,
        platform: Arc<dyn PushTokenProvider>,
        handler: Arc<dyn ActivationHandler>,
        client_id: Option<String>,
    ) -> Result<Self, ActivationError> {
        let device = store.load_device()?.unwrap_or_default();

        let state = match store.load_state()? {
            None => ActivationState::NotActivated,
            Some(blob) => match checkpoint::unarchive(&blob) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable activation checkpoint");
                    ActivationState::NotActivated
                }
            },
        };
        debug!(state = state.name(), "activation machine starting");

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            state,
            device,
            session_client_id: client_id,
            store,
            registrar,
            platform,
            handler,
            // Weak so that in-flight effect tasks don't keep the loop alive
            // after every handle is gone.
            inbox: tx.downgrade(),
            activated_waiters: Vec::new(),
            deactivated_waiters: Vec::new(),
            history: StateHistory::new(),
        };
        tokio::spawn(driver.run(rx));

        Ok(Self { inbox: tx })
    }

    /// Activate push notifications for this device.
    ///
    /// Resolves once the underlying registration settles. Concurrent calls
    /// share one outbound operation but each resolve exactly once.
    pub async fn activate(&self) -> Result<(), ActivationError> {
        self.call(Input::Activate).await
    }

    /// Deactivate push notifications for this device.
    ///
    /// On failure the machine stays in its deregistering state, so calling
    /// this again retries without any reset.
    pub async fn deactivate(&self) -> Result<(), ActivationError> {
        self.call(Input::Deactivate).await
    }

    /// Deliver a platform-issued push token (platform adapter entry point).
    pub fn push_token_issued(&self, token: PushToken) -> Result<(), ActivationError> {
        self.inbox
            .send(Input::PushTokenIssued(token))
            .map_err(|_| ActivationError::Stopped)
    }

    /// Report that the platform failed to issue a push token.
    pub fn push_token_failed(&self, error: ErrorInfo) -> Result<(), ActivationError> {
        self.inbox
            .send(Input::PushTokenFailed(error))
            .map_err(|_| ActivationError::Stopped)
    }

    /// Fetch a diagnostics snapshot: current state, device record, history.
    pub async fn inspect(&self) -> Result<InspectReport, ActivationError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(Input::Inspect(tx))
            .map_err(|_| ActivationError::Stopped)?;
        rx.await.map_err(|_| ActivationError::Stopped)
    }

    async fn call(&self, make: impl FnOnce(Waiter) -> Input) -> Result<(), ActivationError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(make(tx))
            .map_err(|_| ActivationError::Stopped)?;
        rx.await.map_err(|_| ActivationError::Stopped)??;
        Ok(())
    }
}

/// The serial event loop and its owned state.
struct Driver {
    state: ActivationState,
    device: LocalDevice,
    session_client_id: Option<String>,
    store: Arc<dyn DeviceStore>,
    registrar: Arc<dyn RegistrationClient>,
    platform: Arc<dyn PushTokenProvider>,
    handler: Arc<dyn ActivationHandler>,
    inbox: mpsc::WeakUnboundedSender<Input>,
    activated_waiters: Vec<Waiter>,
    deactivated_waiters: Vec<Waiter>,
    history: StateHistory,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            match input {
                Input::Activate(waiter) => {
                    self.activated_waiters.push(waiter);
                    self.dispatch(Event::CalledActivate);
                }
                Input::Deactivate(waiter) => {
                    self.deactivated_waiters.push(waiter);
                    self.dispatch(Event::CalledDeactivate);
                }
                Input::PushTokenIssued(token) => {
                    // Stored before dispatch so the event stays payload-free
                    // and the table sees the token through the snapshot.
                    self.device.set_push_token(token);
                    self.save_device();
                    self.dispatch(Event::GotPushDeviceDetails);
                }
                Input::PushTokenFailed(err) => {
                    self.dispatch(Event::GettingPushDeviceDetailsFailed { error: err });
                }
                Input::Event(event) => self.dispatch(event),
                Input::Inspect(reply) => {
                    let _ = reply.send(InspectReport {
                        state: self.state.clone(),
                        device: self.device.clone(),
                        history: self.history.clone(),
                    });
                }
            }
        }
        debug!("activation machine stopped");
    }

    fn dispatch(&mut self, event: Event) {
        let snapshot = self.snapshot();
        let Some(Outcome { next, effects }) = self.state.transition(&event, &snapshot) else {
            debug!(
                state = self.state.name(),
                event = event.name(),
                "dropping unhandled event"
            );
            return;
        };

        debug!(
            from = self.state.name(),
            to = next.name(),
            event = event.name(),
            "transition"
        );
        self.history = self.history.record(TransitionRecord {
            from: self.state.name().to_string(),
            to: next.name().to_string(),
            event: event.name().to_string(),
            timestamp: Utc::now(),
        });
        self.state = next;

        if self.state.is_checkpointable() {
            self.checkpoint();
        }

        for effect in effects {
            self.apply(effect);
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        let client_id_conflict = match (&self.device.client_id, &self.session_client_id) {
            (Some(stored), Some(session)) => stored != session,
            _ => false,
        };
        DeviceSnapshot {
            registered: self.device.is_registered(),
            has_push_token: self.device.has_push_token(),
            client_id_conflict,
        }
    }

    fn apply(&mut self, effect: SideEffect) {
        match effect {
            SideEffect::EnsureDeviceIdentity => {
                if self.device.ensure_identity() {
                    self.device.client_id = self.session_client_id.clone();
                    self.save_device();
                }
            }
            SideEffect::RequestPushToken => {
                let platform = Arc::clone(&self.platform);
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let input = match platform.request_push_token().await {
                        Ok(token) => Input::PushTokenIssued(token),
                        Err(err) => Input::PushTokenFailed(err),
                    };
                    submit(&inbox, input);
                });
            }
            SideEffect::IssueRegistration => {
                let registrar = Arc::clone(&self.registrar);
                let device = self.device.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let event = match registrar.register(&device).await {
                        Ok(identity_token) => Event::GotDeviceRegistration { identity_token },
                        Err(error) => Event::GettingDeviceRegistrationFailed { error },
                    };
                    submit(&inbox, Input::Event(event));
                });
            }
            SideEffect::IssueRegistrationSync => {
                let registrar = Arc::clone(&self.registrar);
                let device = self.device.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let event = match registrar.update(&device).await {
                        Ok(identity_token) => Event::RegistrationSynced { identity_token },
                        Err(error) => Event::SyncRegistrationFailed { error },
                    };
                    submit(&inbox, Input::Event(event));
                });
            }
            SideEffect::IssueDeregistration => {
                let registrar = Arc::clone(&self.registrar);
                let device = self.device.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let event = match registrar.deregister(&device).await {
                        Ok(()) => Event::Deregistered,
                        Err(error) => Event::DeregistrationFailed { error },
                    };
                    submit(&inbox, Input::Event(event));
                });
            }
            SideEffect::PersistIdentityToken(token) => {
                self.device.identity_token = Some(IdentityTokenDetails::new(token));
                if self.device.client_id.is_none() {
                    self.device.client_id = self.session_client_id.clone();
                }
                self.save_device();
            }
            SideEffect::ResetIdentityToken => {
                self.device.identity_token = None;
                self.save_device();
            }
            SideEffect::ResetDevice => {
                self.device.reset();
                self.save_device();
            }
            SideEffect::Callback { kind, error } => self.fire_callback(kind, error),
            SideEffect::Enqueue(event) => submit(&self.inbox, Input::Event(event)),
        }
    }

    fn fire_callback(&mut self, kind: CallbackKind, error: Option<ErrorInfo>) {
        let result = match &error {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        };
        match kind {
            CallbackKind::Activated => {
                for waiter in self.activated_waiters.drain(..) {
                    let _ = waiter.send(result.clone());
                }
                self.handler.activated(error.as_ref());
            }
            CallbackKind::Deactivated => {
                for waiter in self.deactivated_waiters.drain(..) {
                    let _ = waiter.send(result.clone());
                }
                self.handler.deactivated(error.as_ref());
            }
            CallbackKind::Updated => self.handler.updated(error.as_ref()),
        }
    }

    fn checkpoint(&self) {
        match checkpoint::archive(&self.state) {
            Ok(blob) => {
                if let Err(e) = self.store.save_state(&blob) {
                    error!(state = self.state.name(), error = %e, "failed to persist checkpoint");
                }
            }
            Err(e) => error!(state = self.state.name(), error = %e, "failed to archive state"),
        }
    }

    fn save_device(&self) {
        if let Err(e) = self.store.save_device(&self.device) {
            error!(error = %e, "failed to persist device record");
        }
    }
}

fn submit(inbox: &mpsc::WeakUnboundedSender<Input>, input: Input) {
    if let Some(inbox) = inbox.upgrade() {
        let _ = inbox.send(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDeviceStore;
    use crate::ports::NoopHandler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubRegistrar {
        registers: AtomicUsize,
        updates: AtomicUsize,
        deregisters: AtomicUsize,
        fail_with: Option<ErrorInfo>,
    }

    impl StubRegistrar {
        fn new() -> Self {
            Self {
                registers: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                deregisters: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(err: ErrorInfo) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl RegistrationClient for StubRegistrar {
        async fn register(&self, _device: &LocalDevice) -> Result<Option<String>, ErrorInfo> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(Some("identity-token".into())),
            }
        }

        async fn update(&self, _device: &LocalDevice) -> Result<Option<String>, ErrorInfo> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(Some("refreshed-token".into())),
            }
        }

        async fn deregister(&self, _device: &LocalDevice) -> Result<(), ErrorInfo> {
            self.deregisters.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    struct StubPlatform {
        requests: AtomicUsize,
    }

    impl StubPlatform {
        fn new() -> Self {
            Self {
                requests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PushTokenProvider for StubPlatform {
        async fn request_push_token(&self) -> Result<PushToken, ErrorInfo> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(PushToken {
                transport: "apns".into(),
                token: "device-token".into(),
            })
        }
    }

    fn machine(
        store: Arc<dyn DeviceStore>,
        registrar: Arc<StubRegistrar>,
        platform: Arc<StubPlatform>,
    ) -> ActivationMachine {
        ActivationMachine::spawn(store, registrar, platform, Arc::new(NoopHandler), None).unwrap()
    }

    #[tokio::test]
    async fn activate_registers_and_reaches_steady_state() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store.clone(), registrar.clone(), platform.clone());

        machine.activate().await.unwrap();

        let report = machine.inspect().await.unwrap();
        assert_eq!(report.state, ActivationState::WaitingForNewPushDeviceDetails);
        assert!(report.device.has_identity());
        assert_eq!(
            report.device.identity_token.as_ref().map(|t| t.token.as_str()),
            Some("identity-token")
        );
        assert_eq!(platform.requests.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.registers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_registration_surfaces_error_and_resets_state() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::failing(ErrorInfo::new(40000, "rejected")));
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar, platform);

        let err = machine.activate().await.unwrap_err();
        match err {
            ActivationError::Failed(info) => assert_eq!(info.code, 40000),
            other => panic!("unexpected error: {other:?}"),
        }

        let report = machine.inspect().await.unwrap();
        assert_eq!(report.state, ActivationState::NotActivated);
    }

    #[tokio::test]
    async fn concurrent_activates_share_one_operation() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar.clone(), platform.clone());

        let (a, b, c) = tokio::join!(machine.activate(), machine.activate(), machine.activate());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(platform.requests.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.registers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deactivate_after_activate_deregisters_and_resets() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar.clone(), platform);

        machine.activate().await.unwrap();
        machine.deactivate().await.unwrap();

        assert_eq!(registrar.deregisters.load(Ordering::SeqCst), 1);
        let report = machine.inspect().await.unwrap();
        assert_eq!(report.state, ActivationState::NotActivated);
        assert!(!report.device.has_identity());
    }

    #[tokio::test]
    async fn deactivate_when_never_registered_resolves_immediately() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar.clone(), platform);

        machine.deactivate().await.unwrap();
        assert_eq!(registrar.deregisters.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn os_token_refresh_while_activated_syncs_registration() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar.clone(), platform);

        machine.activate().await.unwrap();
        machine
            .push_token_issued(PushToken {
                transport: "apns".into(),
                token: "rotated".into(),
            })
            .unwrap();

        // The sync is OS-initiated; poll until it settles.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let report = machine.inspect().await.unwrap();
            if report.state == ActivationState::WaitingForNewPushDeviceDetails
                && registrar.updates.load(Ordering::SeqCst) == 1
            {
                assert_eq!(
                    report.device.push_tokens.get("apns").map(String::as_str),
                    Some("rotated")
                );
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "sync never settled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn history_archives_the_transition_path() {
        let store = Arc::new(MemoryDeviceStore::new());
        let registrar = Arc::new(StubRegistrar::new());
        let platform = Arc::new(StubPlatform::new());
        let machine = machine(store, registrar, platform);

        machine.activate().await.unwrap();

        let report = machine.inspect().await.unwrap();
        assert_eq!(
            report.history.get_path(),
            vec![
                "NotActivated",
                "WaitingForPushDeviceDetails",
                "WaitingForDeviceRegistration",
                "WaitingForNewPushDeviceDetails"
            ]
        );
    }
}
