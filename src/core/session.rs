//! Device configuration session
//!
//! Owns the transport and the last configuration the device reported (the
//! baseline), and makes sure only one command/response cycle runs at a time.
//! A link-down notification tears the session down even while a cycle is in
//! flight; the cycle's future is dropped and its read lock released.

use std::{future::Future, sync::Arc};

use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    config::ProtocolSettings,
    core::{
        applier::{ApplyReport, ConfigApplier},
        error::{ProtocolError, ProtocolResult, ServiceError, ServiceResult},
        fetcher::ConfigFetcher,
        scanner::ScanCycle,
        types::{
            ApplyOutcome, DeviceConfiguration, DeviceSettings, DisconnectReason, Operation,
            SessionId, SessionState, WifiNetwork,
        },
    },
    protocol::SessionEvent,
    transport::{LinkState, SerialTransport, watch_until},
};

const EVENT_CAPACITY: usize = 16;

/// What a running cycle borrows from the session
struct Lease<T> {
    transport: Arc<T>,
    cancel: watch::Receiver<bool>,
    generation: u64,
}

/// Session state machine
struct SessionInner<T> {
    state: SessionState,
    /// Bumped on every connect so a late teardown of an old connection is a no-op
    generation: u64,
    transport: Option<Arc<T>>,
    baseline: Option<DeviceConfiguration>,
    cancel: Option<watch::Sender<bool>>,
}

impl<T> SessionInner<T> {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            generation: 0,
            transport: None,
            baseline: None,
            cancel: None,
        }
    }

    fn begin_connect(&mut self, transport: Arc<T>) -> ServiceResult<Lease<T>> {
        if self.state != SessionState::Disconnected {
            return Err(ServiceError::AlreadyConnected);
        }

        let (cancel_tx, cancel) = watch::channel(false);
        self.generation += 1;
        self.state = SessionState::Connecting;
        self.transport = Some(Arc::clone(&transport));
        self.baseline = None;
        self.cancel = Some(cancel_tx);

        Ok(Lease {
            transport,
            cancel,
            generation: self.generation,
        })
    }

    fn ensure_idle(&self) -> ServiceResult<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Busy(_) => Err(ServiceError::OperationInProgress),
            SessionState::Connecting | SessionState::Disconnected => {
                Err(ServiceError::NotConnected)
            }
        }
    }

    /// Settings the next write is diffed against
    fn ready_baseline(&self) -> ServiceResult<DeviceSettings> {
        self.ensure_idle()?;
        self.baseline
            .as_ref()
            .map(|config| config.settings.clone())
            .ok_or(ServiceError::BaselineUnknown)
    }

    fn begin(&mut self, operation: Operation) -> ServiceResult<Lease<T>> {
        self.ensure_idle()?;
        let (Some(transport), Some(cancel)) = (&self.transport, &self.cancel) else {
            return Err(ServiceError::NotConnected);
        };

        let lease = Lease {
            transport: Arc::clone(transport),
            cancel: cancel.subscribe(),
            generation: self.generation,
        };
        self.state = SessionState::Busy(operation);
        Ok(lease)
    }

    /// Return to `Connected` if connection `generation` is still current
    fn finish(&mut self, generation: u64) -> ServiceResult<()> {
        if self.generation != generation || self.state == SessionState::Disconnected {
            return Err(ServiceError::Disconnected);
        }
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Drop everything belonging to connection `generation`
    ///
    /// Returns the transport to close, `None` when that connection is already
    /// gone.
    fn take(&mut self, generation: u64) -> Option<Arc<T>> {
        if self.generation != generation || self.state == SessionState::Disconnected {
            return None;
        }
        self.state = SessionState::Disconnected;
        self.baseline = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.send_replace(true);
        }
        self.transport.take()
    }
}

struct Shared<T> {
    id: SessionId,
    inner: RwLock<SessionInner<T>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: SerialTransport> Shared<T> {
    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    async fn teardown(&self, generation: u64, reason: DisconnectReason) -> bool {
        let transport = self.inner.write().await.take(generation);
        let Some(transport) = transport else {
            return false;
        };

        transport.close().await;
        info!(session = %self.id, ?reason, "Session disconnected");
        self.emit(SessionEvent::disconnected(reason));
        true
    }
}

/// Configuration session with one serial device
///
/// All operations take `&self`; a second operation while one is running
/// fails with [`ServiceError::OperationInProgress`] instead of queueing.
pub struct DeviceSession<T: SerialTransport> {
    settings: ProtocolSettings,
    shared: Arc<Shared<T>>,
}

impl<T: SerialTransport> DeviceSession<T> {
    pub fn new(settings: ProtocolSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            shared: Arc::new(Shared {
                id: SessionId::new(),
                inner: RwLock::new(SessionInner::new()),
                events,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.read().await.state
    }

    /// Last configuration the device reported, if known
    pub async fn baseline(&self) -> Option<DeviceConfiguration> {
        self.shared.inner.read().await.baseline.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Take ownership of an opened transport and read the configuration
    ///
    /// Any failure tears the session down again.
    pub async fn connect(&self, transport: T) -> ServiceResult<DeviceConfiguration> {
        let lease = self
            .shared
            .inner
            .write()
            .await
            .begin_connect(Arc::new(transport))?;
        info!(session = %self.shared.id, "Connecting to device");
        self.shared
            .emit(SessionEvent::state(SessionState::Connecting));
        self.watch_link(&lease);

        let policy = self.settings.fetch;
        let result = run_cycle(
            lease.cancel.clone(),
            ConfigFetcher::new(&*lease.transport, policy).fetch(),
        )
        .await;

        let config = match result {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                warn!(session = %self.shared.id, "Initial configuration fetch failed: {}", e);
                let reason = if e.is_transport_fault() {
                    DisconnectReason::TransportFault
                } else {
                    DisconnectReason::NoResponse
                };
                self.shared.teardown(lease.generation, reason).await;
                return Err(into_service_error(e));
            }
            None => return Err(ServiceError::Disconnected),
        };

        {
            let mut inner = self.shared.inner.write().await;
            inner.finish(lease.generation)?;
            inner.baseline = Some(config.clone());
        }
        info!(
            session = %self.shared.id,
            "Connected (firmware {})",
            config.firmware_label()
        );
        self.shared
            .emit(SessionEvent::connected(config.firmware_version.clone()));
        Ok(config)
    }

    /// Re-read the configuration and replace the baseline
    pub async fn refresh(&self) -> ServiceResult<DeviceConfiguration> {
        let lease = self
            .shared
            .inner
            .write()
            .await
            .begin(Operation::FetchConfig)?;
        let policy = self.settings.fetch;

        self.run(
            Operation::FetchConfig,
            lease,
            |transport| async move { ConfigFetcher::new(&*transport, policy).fetch().await },
            |inner, config: &DeviceConfiguration| inner.baseline = Some(config.clone()),
        )
        .await
    }

    /// Write `proposed`, reboot the device and verify
    ///
    /// The baseline only moves when the device reads back exactly what was
    /// written. After a failed verification the device state is unknown and
    /// the configuration has to be fetched again before the next write.
    pub async fn apply_config(&self, proposed: DeviceSettings) -> ServiceResult<ApplyReport> {
        let (lease, baseline) = {
            let mut inner = self.shared.inner.write().await;
            let baseline = inner.ready_baseline()?;
            (inner.begin(Operation::ApplyConfig)?, baseline)
        };
        let settings = self.settings;

        self.run(
            Operation::ApplyConfig,
            lease,
            |transport| async move {
                ConfigApplier::new(&*transport, &settings)
                    .apply(&baseline, &proposed)
                    .await
            },
            |inner, report: &ApplyReport| match report.outcome {
                ApplyOutcome::Applied => inner.baseline = report.reported.clone(),
                ApplyOutcome::VerifyFailed => inner.baseline = None,
                ApplyOutcome::NoChange | ApplyOutcome::Mismatch { .. } => {}
            },
        )
        .await
    }

    /// Run a WiFi scan on the device
    pub async fn scan_wifi(&self) -> ServiceResult<Vec<WifiNetwork>> {
        let lease = self
            .shared
            .inner
            .write()
            .await
            .begin(Operation::ScanWifi)?;
        let policy = self.settings.scan;

        self.run(
            Operation::ScanWifi,
            lease,
            |transport| async move { ScanCycle::new(&*transport, policy).scan().await },
            |_, _: &Vec<WifiNetwork>| {},
        )
        .await
    }

    /// Close the connection; harmless when already disconnected
    pub async fn disconnect(&self) {
        let generation = self.shared.inner.read().await.generation;
        if !self
            .shared
            .teardown(generation, DisconnectReason::User)
            .await
        {
            debug!(session = %self.shared.id, "Disconnect requested while not connected");
        }
    }

    /// Spawn the task that tears the session down when the device goes away
    fn watch_link(&self, lease: &Lease<T>) {
        let link = lease.transport.link_events();
        let cancel = lease.cancel.clone();
        let generation = lease.generation;
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            tokio::select! {
                _ = watch_until(cancel, |cancelled| *cancelled) => {}
                _ = watch_until(link, |state| *state == LinkState::Down) => {
                    warn!(session = %shared.id, "Device link went down");
                    shared.teardown(generation, DisconnectReason::DeviceRemoved).await;
                }
            }
        });
    }

    /// Run one cycle in `Busy(operation)`, racing it against teardown
    ///
    /// `commit` updates the session under the same lock that returns it to
    /// `Connected`, and only on success.
    async fn run<R, F, Fut, C>(
        &self,
        operation: Operation,
        lease: Lease<T>,
        cycle: F,
        commit: C,
    ) -> ServiceResult<R>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = ProtocolResult<R>>,
        C: FnOnce(&mut SessionInner<T>, &R),
    {
        debug!(session = %self.shared.id, ?operation, "Starting operation");
        self.shared
            .emit(SessionEvent::state(SessionState::Busy(operation)));

        let generation = lease.generation;
        let Some(result) = run_cycle(lease.cancel, cycle(lease.transport)).await else {
            debug!(session = %self.shared.id, ?operation, "Operation cancelled by teardown");
            return Err(ServiceError::Disconnected);
        };

        match result {
            Err(e) if e.is_transport_fault() => {
                warn!(session = %self.shared.id, ?operation, "Transport fault: {}", e);
                self.shared
                    .teardown(generation, DisconnectReason::TransportFault)
                    .await;
                Err(into_service_error(e))
            }
            result => {
                {
                    let mut inner = self.shared.inner.write().await;
                    inner.finish(generation)?;
                    if let Ok(value) = &result {
                        commit(&mut *inner, value);
                    }
                }
                self.shared
                    .emit(SessionEvent::state(SessionState::Connected));
                result.map_err(into_service_error)
            }
        }
    }
}

/// Race `cycle` against the cancel signal; `None` when cancelled
///
/// Dropping the losing cycle future releases whatever it held, read lock
/// included.
async fn run_cycle<R>(cancel: watch::Receiver<bool>, cycle: impl Future<Output = R>) -> Option<R> {
    tokio::select! {
        biased;
        _ = watch_until(cancel, |cancelled| *cancelled) => None,
        result = cycle => Some(result),
    }
}

fn into_service_error(e: ProtocolError) -> ServiceError {
    match e {
        ProtocolError::Transport(e) => e.into(),
        other => other.into(),
    }
}
