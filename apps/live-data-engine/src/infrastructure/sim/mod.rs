//! Simulated Data Client
//!
//! An in-process [`DataClient`] serving a fixed catalog of instruments,
//! trades and bars. Responses are delivered through the engine's
//! [`DataSink`] after a configurable latency, the way a venue adapter
//! delivers them from its socket task.
//!
//! Used by the demo binary and by tests. Test hooks:
//!
//! - [`hold_responses`](SimulatedDataClient::hold_responses): accept
//!   requests but never answer them
//! - [`fail_next_connect`](SimulatedDataClient::fail_next_connect)
//! - [`simulate_connection_loss`](SimulatedDataClient::simulate_connection_loss)
//! - [`calls`](SimulatedDataClient::calls): counts of every call received

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DataClient, DataClientError, DataSink};
use crate::domain::data::{
    Bar, BarType, Data, DataResponse, Instrument, QuoteTick, ResponsePayload, TradeTick,
};
use crate::domain::identifiers::{ClientId, CorrelationId, InstrumentId, Venue};
use crate::domain::subscription::Subscription;

// =============================================================================
// Call Counts
// =============================================================================

#[derive(Debug, Default)]
struct CallCounters {
    connects: AtomicU64,
    disconnects: AtomicU64,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    requests: AtomicU64,
    resets: AtomicU64,
    disposes: AtomicU64,
}

/// Calls a [`SimulatedDataClient`] has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCalls {
    /// `connect` calls.
    pub connects: u64,
    /// `disconnect` calls.
    pub disconnects: u64,
    /// `subscribe_*` calls.
    pub subscribes: u64,
    /// `unsubscribe_*` calls.
    pub unsubscribes: u64,
    /// `request_*` calls.
    pub requests: u64,
    /// `reset` calls.
    pub resets: u64,
    /// `dispose` calls that released resources.
    pub disposes: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Default)]
struct Catalog {
    instruments: Vec<Instrument>,
    trades: Vec<TradeTick>,
    bars: Vec<Bar>,
}

fn in_range(ts: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
    start.is_none_or(|start| ts >= start) && end.is_none_or(|end| ts <= end)
}

// Keeps the most recent `limit` items; 0 keeps everything.
fn apply_limit<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if limit > 0 && items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}

// =============================================================================
// Simulated Data Client
// =============================================================================

/// In-process data client for one venue.
#[derive(Debug)]
pub struct SimulatedDataClient {
    client_id: ClientId,
    venue: Venue,
    sink: DataSink,
    latency: Duration,
    connected: AtomicBool,
    disposed: AtomicBool,
    hold_responses: AtomicBool,
    connect_failure: Mutex<Option<String>>,
    catalog: RwLock<Catalog>,
    subscriptions: Mutex<HashSet<Subscription>>,
    held: Mutex<Vec<CorrelationId>>,
    calls: CallCounters,
}

impl SimulatedDataClient {
    /// Create a disconnected client delivering into `sink` with no latency.
    #[must_use]
    pub fn new(client_id: ClientId, venue: Venue, sink: DataSink) -> Self {
        Self {
            client_id,
            venue,
            sink,
            latency: Duration::ZERO,
            connected: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            hold_responses: AtomicBool::new(false),
            connect_failure: Mutex::new(None),
            catalog: RwLock::new(Catalog::default()),
            subscriptions: Mutex::new(HashSet::new()),
            held: Mutex::new(Vec::new()),
            calls: CallCounters::default(),
        }
    }

    /// Delay every response by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Add or replace an instrument definition.
    pub fn add_instrument(&self, instrument: Instrument) {
        let mut catalog = self.catalog.write();
        catalog.instruments.retain(|existing| existing.id != instrument.id);
        catalog.instruments.push(instrument);
    }

    /// Append historical trades.
    pub fn add_trades(&self, trades: impl IntoIterator<Item = TradeTick>) {
        self.catalog.write().trades.extend(trades);
    }

    /// Append historical bars.
    pub fn add_bars(&self, bars: impl IntoIterator<Item = Bar>) {
        self.catalog.write().bars.extend(bars);
    }

    /// Instruments in the catalog.
    #[must_use]
    pub fn instruments(&self) -> Vec<Instrument> {
        self.catalog.read().instruments.clone()
    }

    // =========================================================================
    // Test Hooks
    // =========================================================================

    /// Accept requests without answering them until turned off.
    pub fn hold_responses(&self, hold: bool) {
        self.hold_responses.store(hold, Ordering::SeqCst);
    }

    /// Tokens of requests accepted while holding.
    #[must_use]
    pub fn held_requests(&self) -> Vec<CorrelationId> {
        self.held.lock().clone()
    }

    /// Make the next `connect` fail with `message`.
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        *self.connect_failure.lock() = Some(message.into());
    }

    /// Drop the connection and report the loss to the engine.
    pub fn simulate_connection_loss(&self, reason: impl Into<String>) {
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        self.sink.connection_lost(self.client_id.clone(), reason);
    }

    /// Push a streaming event to the engine. Ignored while disconnected.
    pub fn publish(&self, data: Data) {
        if !self.is_connected() {
            tracing::debug!(client_id = %self.client_id, "Not connected, event not sent");
            return;
        }
        self.sink.send_data(self.client_id.clone(), data);
    }

    /// Whether this client holds `subscription`.
    #[must_use]
    pub fn is_subscribed(&self, subscription: &Subscription) -> bool {
        self.subscriptions.lock().contains(subscription)
    }

    /// Number of subscriptions this client holds.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> SimCalls {
        SimCalls {
            connects: self.calls.connects.load(Ordering::Relaxed),
            disconnects: self.calls.disconnects.load(Ordering::Relaxed),
            subscribes: self.calls.subscribes.load(Ordering::Relaxed),
            unsubscribes: self.calls.unsubscribes.load(Ordering::Relaxed),
            requests: self.calls.requests.load(Ordering::Relaxed),
            resets: self.calls.resets.load(Ordering::Relaxed),
            disposes: self.calls.disposes.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Quote Generator
    // =========================================================================

    /// Publish a quote for `instrument` every `interval` until `shutdown`
    /// is cancelled. Prices walk around a mid of 100 in price increments.
    pub fn spawn_quote_feed(
        self: &Arc<Self>,
        instrument: Instrument,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut step: i64 = 0;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        client.publish(Data::Quote(simulated_quote(&instrument, step)));
                        step = (step + 7) % 41;
                    }
                }
            }
            tracing::debug!(instrument_id = %instrument.id, "Quote feed stopped");
        })
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    fn ensure_live(&self) -> Result<(), DataClientError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(DataClientError::Disposed {
                client_id: self.client_id.clone(),
            });
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), DataClientError> {
        self.ensure_live()?;
        if !self.is_connected() {
            return Err(DataClientError::NotConnected {
                client_id: self.client_id.clone(),
            });
        }
        Ok(())
    }

    fn track(&self, subscription: Subscription, subscribe: bool) -> Result<(), DataClientError> {
        self.ensure_connected()?;
        let mut subscriptions = self.subscriptions.lock();
        if subscribe {
            bump(&self.calls.subscribes);
            subscriptions.insert(subscription);
        } else {
            bump(&self.calls.unsubscribes);
            subscriptions.remove(&subscription);
        }
        Ok(())
    }

    fn accept_request(&self, correlation_id: CorrelationId) -> Result<bool, DataClientError> {
        self.ensure_live()?;
        bump(&self.calls.requests);
        if self.hold_responses.load(Ordering::SeqCst) {
            self.held.lock().push(correlation_id);
            return Ok(false);
        }
        Ok(true)
    }

    fn respond(&self, correlation_id: CorrelationId, outcome: Result<ResponsePayload, String>) {
        let sink = self.sink.clone();
        let client_id = self.client_id.clone();
        let deliver = move || match outcome {
            Ok(payload) => sink.send_response(DataResponse::new(correlation_id, client_id, payload)),
            Err(message) => sink.send_failure(correlation_id, client_id, message),
        };

        if self.latency.is_zero() {
            deliver();
        } else {
            let latency = self.latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                deliver();
            });
        }
    }
}

fn simulated_quote(instrument: &Instrument, step: i64) -> QuoteTick {
    let increment = instrument.price_increment;
    let mid = Decimal::ONE_HUNDRED + increment * Decimal::from(step - 20);
    QuoteTick {
        instrument_id: instrument.id.clone(),
        bid_price: mid - increment,
        ask_price: mid + increment,
        bid_size: Decimal::ONE_THOUSAND,
        ask_size: Decimal::ONE_THOUSAND,
        ts_event: Utc::now(),
    }
}

#[async_trait]
impl DataClient for SimulatedDataClient {
    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn venue(&self) -> &Venue {
        &self.venue
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), DataClientError> {
        self.ensure_live()?;
        bump(&self.calls.connects);
        if let Some(message) = self.connect_failure.lock().take() {
            return Err(DataClientError::Connection { message });
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(client_id = %self.client_id, "Simulated client connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DataClientError> {
        bump(&self.calls.disconnects);
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        Ok(())
    }

    fn reset(&self) {
        bump(&self.calls.resets);
        self.held.lock().clear();
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        bump(&self.calls.disposes);
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        self.held.lock().clear();
    }

    async fn subscribe_instruments(&self) -> Result<(), DataClientError> {
        self.track(Subscription::instruments(self.venue.clone()), true)
    }

    async fn unsubscribe_instruments(&self) -> Result<(), DataClientError> {
        self.track(Subscription::instruments(self.venue.clone()), false)
    }

    async fn subscribe_instrument(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), DataClientError> {
        self.track(Subscription::instrument(instrument_id), true)
    }

    async fn unsubscribe_instrument(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), DataClientError> {
        self.track(Subscription::instrument(instrument_id), false)
    }

    async fn subscribe_quotes(&self, instrument_id: &InstrumentId) -> Result<(), DataClientError> {
        self.track(Subscription::quotes(instrument_id), true)
    }

    async fn unsubscribe_quotes(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), DataClientError> {
        self.track(Subscription::quotes(instrument_id), false)
    }

    async fn subscribe_trades(&self, instrument_id: &InstrumentId) -> Result<(), DataClientError> {
        self.track(Subscription::trades(instrument_id), true)
    }

    async fn unsubscribe_trades(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), DataClientError> {
        self.track(Subscription::trades(instrument_id), false)
    }

    async fn subscribe_bars(&self, bar_type: &BarType) -> Result<(), DataClientError> {
        self.track(Subscription::bars(bar_type), true)
    }

    async fn unsubscribe_bars(&self, bar_type: &BarType) -> Result<(), DataClientError> {
        self.track(Subscription::bars(bar_type), false)
    }

    async fn request_instrument(
        &self,
        instrument_id: &InstrumentId,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError> {
        if !self.accept_request(correlation_id)? {
            return Ok(());
        }
        let found = self
            .catalog
            .read()
            .instruments
            .iter()
            .find(|instrument| &instrument.id == instrument_id)
            .cloned();
        let outcome = found
            .map(ResponsePayload::Instrument)
            .ok_or_else(|| format!("instrument {instrument_id} not found"));
        self.respond(correlation_id, outcome);
        Ok(())
    }

    async fn request_instruments(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError> {
        if !self.accept_request(correlation_id)? {
            return Ok(());
        }
        let instruments = self.instruments();
        self.respond(correlation_id, Ok(ResponsePayload::Instruments(instruments)));
        Ok(())
    }

    async fn request_trades(
        &self,
        instrument_id: &InstrumentId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError> {
        if !self.accept_request(correlation_id)? {
            return Ok(());
        }
        let trades: Vec<TradeTick> = self
            .catalog
            .read()
            .trades
            .iter()
            .filter(|trade| &trade.instrument_id == instrument_id)
            .filter(|trade| in_range(trade.ts_event, start, end))
            .cloned()
            .collect();
        self.respond(
            correlation_id,
            Ok(ResponsePayload::Trades(apply_limit(trades, limit))),
        );
        Ok(())
    }

    async fn request_bars(
        &self,
        bar_type: &BarType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError> {
        if !self.accept_request(correlation_id)? {
            return Ok(());
        }
        let bars: Vec<Bar> = self
            .catalog
            .read()
            .bars
            .iter()
            .filter(|bar| &bar.bar_type == bar_type)
            .filter(|bar| in_range(bar.ts_event, start, end))
            .cloned()
            .collect();
        self.respond(
            correlation_id,
            Ok(ResponsePayload::Bars(apply_limit(bars, limit))),
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
