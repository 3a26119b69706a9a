//! Live Data Engine
//!
//! Routes subscriptions and historical data requests to the data client
//! registered for each venue, correlates the responses clients deliver
//! later and publishes streaming events to the data hub.
//!
//! # Architecture
//!
//! ```text
//! caller ──► LiveDataEngine ──┐
//!                             ▼
//! DataSink (client tasks) ──► inbound queue ──► dispatch loop ──► DataClient
//!                                                  │
//!                                                  ├──► PendingResponse
//!                                                  └──► DataHub
//! ```
//!
//! The handle and every [`DataSink`] share one unbounded queue. A single
//! dispatch loop drains it in arrival order and owns the clients, their
//! subscription registries and the correlation table.
//!
//! # Lifecycle
//!
//! `Stopped → Running → Stopped`, with `Disposed` terminal from any state.
//! `stop` lets the loop drain what is already queued. While stopped, the
//! parked core still applies responses, failures and connection loss that
//! clients push, so pending requests resolve without a restart. Streaming
//! events are dropped until the next `start`.

mod dispatch;
mod error;
mod messages;
mod status;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) use dispatch::ParkedCore;
use dispatch::{CoreSlot, EngineCore};
pub use error::EngineError;
pub use messages::DataRequest;
pub(crate) use messages::EngineMessage;
use messages::{Ack, EngineCommand};
pub use status::{
    ClientSnapshot, ClientStatus, ConnectionState, EngineCounters, EngineState, EngineStatus,
};

use crate::application::ports::{DataClient, DataSink};
use crate::domain::correlation::RequestError;
use crate::domain::data::{BarType, DataResponse};
use crate::domain::identifiers::{CorrelationId, InstrumentId, Venue};
use crate::domain::subscription::Subscription;
use crate::infrastructure::broadcast::{DataHub, HubConfig, SharedDataHub};

// =============================================================================
// Pending Response
// =============================================================================

/// Caller side of a dispatched request.
///
/// Resolves once the client answers, fails, disconnects or the engine is
/// disposed.
#[derive(Debug)]
#[must_use = "a pending response does nothing unless awaited"]
pub struct PendingResponse {
    correlation_id: CorrelationId,
    response: oneshot::Receiver<Result<DataResponse, RequestError>>,
}

impl PendingResponse {
    /// Token the request was registered under.
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Take the outcome if it has already arrived.
    pub fn try_recv(&mut self) -> Option<Result<DataResponse, RequestError>> {
        match self.response.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RequestError::Abandoned)),
        }
    }
}

impl Future for PendingResponse {
    type Output = Result<DataResponse, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.response)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RequestError::Abandoned)))
    }
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Handle to a live data engine.
///
/// Methods take `&self`; share the handle behind an `Arc` to use it from
/// several tasks.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use live_data_engine::{CorrelationId, InstrumentId, LiveDataEngine, SimulatedDataClient};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = LiveDataEngine::default();
/// let client = SimulatedDataClient::new("SIM".parse()?, "SIM".parse()?, engine.data_sink());
/// engine.register_client(Arc::new(client))?;
///
/// engine.start()?;
/// engine.connect().await?;
///
/// let instrument_id: InstrumentId = "AUD/USD.SIM".parse()?;
/// engine.subscribe_quotes(&instrument_id).await?;
/// let response = engine
///     .request_instrument(&instrument_id, CorrelationId::new())
///     .await?
///     .await?;
/// println!("{:?}", response.payload);
///
/// engine.stop();
/// engine.join().await?;
/// engine.dispose();
/// # Ok(())
/// # }
/// ```
pub struct LiveDataEngine {
    inbound_tx: mpsc::UnboundedSender<EngineMessage>,
    lifecycle: RwLock<EngineState>,
    slot: CoreSlot,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<CancellationToken>,
    dispose_requested: Arc<AtomicBool>,
    hub: SharedDataHub,
    counters: Arc<EngineCounters>,
    statuses: RwLock<Vec<Arc<ClientStatus>>>,
}

impl std::fmt::Debug for LiveDataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDataEngine")
            .field("state", &self.state())
            .field("clients", &self.statuses.read().len())
            .finish_non_exhaustive()
    }
}

impl Default for LiveDataEngine {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl LiveDataEngine {
    /// Create a stopped engine with a new data hub.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_hub(Arc::new(DataHub::new(config)))
    }

    /// Create a stopped engine publishing to an existing hub.
    #[must_use]
    pub fn with_hub(hub: SharedDataHub) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let counters = Arc::new(EngineCounters::default());
        let core = EngineCore::new(Arc::clone(&hub), Arc::clone(&counters));

        Self {
            inbound_tx,
            lifecycle: RwLock::new(EngineState::Stopped),
            slot: Arc::new(Mutex::new(Some(ParkedCore { core, inbound }))),
            task: Mutex::new(None),
            shutdown: Mutex::new(CancellationToken::new()),
            dispose_requested: Arc::new(AtomicBool::new(false)),
            hub,
            counters,
            statuses: RwLock::new(Vec::new()),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a data client. One client per venue.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyRunning`] while the loop runs
    /// - [`EngineError::Stopping`] before a stopped loop has parked
    /// - [`EngineError::Disposed`] after disposal
    /// - [`EngineError::DuplicateClient`] if the client id or venue is taken
    pub fn register_client(&self, client: Arc<dyn DataClient>) -> Result<(), EngineError> {
        let state = self.lifecycle.read();
        match *state {
            EngineState::Running => return Err(EngineError::AlreadyRunning),
            EngineState::Disposed => return Err(EngineError::Disposed),
            EngineState::Stopped => {}
        }

        let mut slot = self.slot.lock();
        let parked = slot.as_mut().ok_or(EngineError::Stopping)?;
        let status = parked.core.register(client)?;
        self.statuses.write().push(status);
        Ok(())
    }

    /// A sink data clients use to push responses and streaming events into
    /// this engine.
    #[must_use]
    pub fn data_sink(&self) -> DataSink {
        DataSink::bound(self.inbound_tx.clone(), Arc::downgrade(&self.slot))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Launch the dispatch loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyRunning`] if running
    /// - [`EngineError::Disposed`] after disposal
    /// - [`EngineError::Stopping`] if the previous run has not finished
    ///   draining; await [`join`](Self::join) first
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.lifecycle.write();
        match *state {
            EngineState::Running => return Err(EngineError::AlreadyRunning),
            EngineState::Disposed => return Err(EngineError::Disposed),
            EngineState::Stopped => {}
        }

        let Some(ParkedCore { core, inbound }) = self.slot.lock().take() else {
            return Err(EngineError::Stopping);
        };
        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();

        let handle = tokio::spawn(core.run(
            inbound,
            token,
            Arc::clone(&self.slot),
            Arc::clone(&self.dispose_requested),
        ));
        *self.task.lock() = Some(handle);
        *state = EngineState::Running;

        tracing::info!("Live data engine started");
        Ok(())
    }

    /// Signal the dispatch loop to drain queued work and halt. Idempotent.
    pub fn stop(&self) {
        let mut state = self.lifecycle.write();
        if *state != EngineState::Running {
            return;
        }
        *state = EngineState::Stopped;
        self.shutdown.lock().cancel();
        tracing::info!("Live data engine stopping");
    }

    /// Wait for the dispatch loop to terminate.
    ///
    /// Returns immediately if the loop was never started or has already
    /// been joined.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LoopTerminated`] if the loop panicked.
    pub async fn join(&self) -> Result<(), EngineError> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                tracing::error!(error = %e, "Engine dispatch loop panicked");
                EngineError::LoopTerminated
            })?;
        }
        Ok(())
    }

    /// Release every data client and fail every pending request.
    ///
    /// Safe in any state and idempotent. A running loop is cancelled and
    /// disposes its state before parking.
    pub fn dispose(&self) {
        {
            let mut state = self.lifecycle.write();
            if *state == EngineState::Disposed {
                return;
            }
            *state = EngineState::Disposed;
        }

        self.dispose_requested.store(true, Ordering::SeqCst);
        self.shutdown.lock().cancel();
        self.with_parked(EngineCore::dispose);
        tracing::info!("Live data engine disposed");
    }

    /// Run `f` on the parked core with the slot lock released, so clients
    /// called by `f` may push into their sinks. Returns `None` if no core is
    /// parked.
    fn with_parked<T>(&self, f: impl FnOnce(&mut EngineCore) -> T) -> Option<T> {
        let mut parked = self.slot.lock().take()?;
        let result = f(&mut parked.core);
        loop {
            if self.dispose_requested.load(Ordering::SeqCst) {
                parked.core.dispose();
            }
            let mut slot = self.slot.lock();
            // A dispose that found the slot empty relies on this check.
            if self.dispose_requested.load(Ordering::SeqCst) && !parked.core.is_disposed() {
                continue;
            }
            parked.drain();
            *slot = Some(parked);
            return Some(result);
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.lifecycle.read()
    }

    /// Whether the dispatch loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Whether every registered client is connected. `false` with no
    /// clients.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let statuses = self.statuses.read();
        !statuses.is_empty() && statuses.iter().all(|status| status.is_connected())
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect every client that is not connected, replaying its
    /// subscriptions once connected.
    ///
    /// Every client is attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first client's connection error, or a lifecycle error.
    pub async fn connect(&self) -> Result<(), EngineError> {
        self.execute(EngineCommand::Connect).await
    }

    /// Disconnect every connected client, failing its pending requests.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if the engine is not running.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.execute(EngineCommand::Disconnect).await
    }

    /// Reset every client and zero the command, request, response and data
    /// counts. Subscriptions are kept.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Disposed`] after disposal
    /// - [`EngineError::Stopping`] while a stopped loop is still draining
    pub async fn reset(&self) -> Result<(), EngineError> {
        {
            let state = self.lifecycle.read();
            match *state {
                EngineState::Running => {}
                EngineState::Disposed => return Err(EngineError::Disposed),
                EngineState::Stopped => {
                    return self
                        .with_parked(|core| core.reset())
                        .ok_or(EngineError::Stopping);
                }
            }
        }
        self.execute(EngineCommand::Reset).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Add a subscription. Idempotent.
    ///
    /// The subscription is recorded even while the venue's client is
    /// disconnected and forwarded on the next connect.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoClientForVenue`] if no client serves the venue
    /// - [`EngineError::Client`] if the connected client rejects it
    /// - a lifecycle error if the engine is not running
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), EngineError> {
        self.execute(|ack| EngineCommand::Subscribe { subscription, ack })
            .await
    }

    /// Remove a subscription. Idempotent.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), EngineError> {
        self.execute(|ack| EngineCommand::Unsubscribe { subscription, ack })
            .await
    }

    /// Subscribe to definition updates for every instrument on a venue.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_instruments(&self, venue: &Venue) -> Result<(), EngineError> {
        self.subscribe(Subscription::instruments(venue.clone()))
            .await
    }

    /// Unsubscribe from venue-wide definition updates.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe_instruments(&self, venue: &Venue) -> Result<(), EngineError> {
        self.unsubscribe(Subscription::instruments(venue.clone()))
            .await
    }

    /// Subscribe to definition updates for one instrument.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_instrument(&self, instrument_id: &InstrumentId) -> Result<(), EngineError> {
        self.subscribe(Subscription::instrument(instrument_id)).await
    }

    /// Unsubscribe from definition updates for one instrument.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe_instrument(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), EngineError> {
        self.unsubscribe(Subscription::instrument(instrument_id))
            .await
    }

    /// Subscribe to quote ticks.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_quotes(&self, instrument_id: &InstrumentId) -> Result<(), EngineError> {
        self.subscribe(Subscription::quotes(instrument_id)).await
    }

    /// Unsubscribe from quote ticks.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe_quotes(&self, instrument_id: &InstrumentId) -> Result<(), EngineError> {
        self.unsubscribe(Subscription::quotes(instrument_id)).await
    }

    /// Subscribe to trade ticks.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_trades(&self, instrument_id: &InstrumentId) -> Result<(), EngineError> {
        self.subscribe(Subscription::trades(instrument_id)).await
    }

    /// Unsubscribe from trade ticks.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe_trades(&self, instrument_id: &InstrumentId) -> Result<(), EngineError> {
        self.unsubscribe(Subscription::trades(instrument_id)).await
    }

    /// Subscribe to bars.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn subscribe_bars(&self, bar_type: &BarType) -> Result<(), EngineError> {
        self.subscribe(Subscription::bars(bar_type)).await
    }

    /// Unsubscribe from bars.
    ///
    /// # Errors
    ///
    /// As [`subscribe`](Self::subscribe).
    pub async fn unsubscribe_bars(&self, bar_type: &BarType) -> Result<(), EngineError> {
        self.unsubscribe(Subscription::bars(bar_type)).await
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Dispatch a request and return its pending response.
    ///
    /// The returned future resolves with the client's response. Dispatch
    /// errors are returned here and no response follows.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoClientForVenue`] if no client serves the venue
    /// - [`EngineError::NoConnectedClients`] for an instruments request
    ///   with nothing connected
    /// - [`EngineError::DuplicateCorrelation`] if the token is pending
    /// - [`EngineError::Client`] if the client failed to dispatch
    /// - a lifecycle error if the engine is not running
    pub async fn request(&self, request: DataRequest) -> Result<PendingResponse, EngineError> {
        let correlation_id = request.correlation_id();
        let (waiter, response) = oneshot::channel();
        self.execute(|ack| EngineCommand::Request {
            request,
            waiter,
            ack,
        })
        .await?;
        Ok(PendingResponse {
            correlation_id,
            response,
        })
    }

    /// Request one instrument definition.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn request_instrument(
        &self,
        instrument_id: &InstrumentId,
        correlation_id: CorrelationId,
    ) -> Result<PendingResponse, EngineError> {
        self.request(DataRequest::Instrument {
            instrument_id: instrument_id.clone(),
            correlation_id,
        })
        .await
    }

    /// Request every instrument from every connected client, merged into
    /// one response.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn request_instruments(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<PendingResponse, EngineError> {
        self.request(DataRequest::Instruments { correlation_id })
            .await
    }

    /// Request historical trades. `limit == 0` means no limit.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn request_trades(
        &self,
        instrument_id: &InstrumentId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<PendingResponse, EngineError> {
        self.request(DataRequest::Trades {
            instrument_id: instrument_id.clone(),
            start,
            end,
            limit,
            correlation_id,
        })
        .await
    }

    /// Request historical bars. `limit == 0` means no limit.
    ///
    /// # Errors
    ///
    /// As [`request`](Self::request).
    pub async fn request_bars(
        &self,
        bar_type: &BarType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<PendingResponse, EngineError> {
        self.request(DataRequest::Bars {
            bar_type: bar_type.clone(),
            start,
            end,
            limit,
            correlation_id,
        })
        .await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// The hub streaming events are published to.
    #[must_use]
    pub fn hub(&self) -> SharedDataHub {
        Arc::clone(&self.hub)
    }

    /// Live counters.
    #[must_use]
    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Commands processed.
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.counters.command_count()
    }

    /// Requests dispatched.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.counters.request_count()
    }

    /// Responses delivered to callers.
    #[must_use]
    pub fn response_count(&self) -> u64 {
        self.counters.response_count()
    }

    /// Streaming events received, dropped ones included.
    #[must_use]
    pub fn data_count(&self) -> u64 {
        self.counters.data_count()
    }

    /// Status record of every registered client.
    #[must_use]
    pub fn client_statuses(&self) -> Vec<Arc<ClientStatus>> {
        self.statuses.read().clone()
    }

    /// Point-in-time status for health reporting.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            clients: self
                .statuses
                .read()
                .iter()
                .map(|status| status.snapshot())
                .collect(),
            command_count: self.counters.command_count(),
            request_count: self.counters.request_count(),
            response_count: self.counters.response_count(),
            data_count: self.counters.data_count(),
            unknown_response_count: self.counters.unknown_response_count(),
            dropped_data_count: self.counters.dropped_data_count(),
        }
    }

    // =========================================================================
    // Command Plumbing
    // =========================================================================

    async fn execute(&self, command: impl FnOnce(Ack) -> EngineCommand) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        {
            let state = self.lifecycle.read();
            match *state {
                EngineState::Running => {}
                EngineState::Stopped => return Err(EngineError::NotRunning),
                EngineState::Disposed => return Err(EngineError::Disposed),
            }
            self.inbound_tx
                .send(EngineMessage::Command(command(ack)))
                .map_err(|_| EngineError::LoopTerminated)?;
        }
        done.await.map_err(|_| EngineError::LoopTerminated)?
    }
}

impl Drop for LiveDataEngine {
    fn drop(&mut self) {
        self.shutdown.lock().cancel();
    }
}

// =============================================================================
// Tests
// =============================================================================
