//! Port Interfaces
//!
//! The contract between the engine and venue-specific data clients.
//!
//! ## Driven Port (Outbound)
//!
//! - `DataClient`: lifecycle, subscription and request calls the engine
//!   makes on a venue's client.
//!
//! ## Driver Port (Inbound)
//!
//! - `DataSink`: the handle a client uses, from its own tasks, to push
//!   responses, failures, streaming events and connection loss back into
//!   the engine's inbound queue.

use std::sync::Weak;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::application::engine::{EngineMessage, ParkedCore};
use crate::domain::data::{BarType, Data, DataResponse};
use crate::domain::identifiers::{ClientId, CorrelationId, InstrumentId, Venue};

// =============================================================================
// Errors
// =============================================================================

/// Data client error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataClientError {
    /// The operation needs a live connection.
    #[error("data client {client_id} is not connected")]
    NotConnected {
        /// Client that was called.
        client_id: ClientId,
    },

    /// Connecting or disconnecting failed.
    #[error("data client connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// A subscription or request could not be dispatched.
    #[error("data client request error: {message}")]
    Request {
        /// Error details.
        message: String,
    },

    /// The client has been disposed.
    #[error("data client {client_id} has been disposed")]
    Disposed {
        /// Client that was called.
        client_id: ClientId,
    },
}

// =============================================================================
// Data Client Port
// =============================================================================

/// A venue-specific market data client.
///
/// Subscription calls are idempotent. Request calls only dispatch: each one
/// later yields exactly one response or failure for its token, delivered
/// through the client's [`DataSink`]. `limit == 0` means no limit.
#[async_trait]
pub trait DataClient: Send + Sync {
    /// Identifier the engine registers this client under.
    fn client_id(&self) -> &ClientId;

    /// Venue this client serves.
    fn venue(&self) -> &Venue;

    /// Whether the streaming connection is up.
    fn is_connected(&self) -> bool;

    /// Open the streaming connection.
    async fn connect(&self) -> Result<(), DataClientError>;

    /// Close the streaming connection.
    async fn disconnect(&self) -> Result<(), DataClientError>;

    /// Clear transient client state.
    fn reset(&self);

    /// Release all resources. Idempotent.
    fn dispose(&self);

    /// Stream definition updates for every instrument on the venue.
    async fn subscribe_instruments(&self) -> Result<(), DataClientError>;

    /// Stop venue-wide definition updates.
    async fn unsubscribe_instruments(&self) -> Result<(), DataClientError>;

    /// Stream definition updates for one instrument.
    async fn subscribe_instrument(&self, instrument_id: &InstrumentId)
    -> Result<(), DataClientError>;

    /// Stop definition updates for one instrument.
    async fn unsubscribe_instrument(
        &self,
        instrument_id: &InstrumentId,
    ) -> Result<(), DataClientError>;

    /// Stream quote ticks.
    async fn subscribe_quotes(&self, instrument_id: &InstrumentId) -> Result<(), DataClientError>;

    /// Stop quote ticks.
    async fn unsubscribe_quotes(&self, instrument_id: &InstrumentId)
    -> Result<(), DataClientError>;

    /// Stream trade ticks.
    async fn subscribe_trades(&self, instrument_id: &InstrumentId) -> Result<(), DataClientError>;

    /// Stop trade ticks.
    async fn unsubscribe_trades(&self, instrument_id: &InstrumentId)
    -> Result<(), DataClientError>;

    /// Stream bars.
    async fn subscribe_bars(&self, bar_type: &BarType) -> Result<(), DataClientError>;

    /// Stop bars.
    async fn unsubscribe_bars(&self, bar_type: &BarType) -> Result<(), DataClientError>;

    /// Request one instrument definition.
    async fn request_instrument(
        &self,
        instrument_id: &InstrumentId,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError>;

    /// Request every instrument definition the venue lists.
    async fn request_instruments(&self, correlation_id: CorrelationId)
    -> Result<(), DataClientError>;

    /// Request historical trades.
    async fn request_trades(
        &self,
        instrument_id: &InstrumentId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError>;

    /// Request historical bars.
    async fn request_bars(
        &self,
        bar_type: &BarType,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
        correlation_id: CorrelationId,
    ) -> Result<(), DataClientError>;
}

// =============================================================================
// Data Sink
// =============================================================================

/// Inbound handle into an engine's queue.
///
/// Cheap to clone and safe to use from any task. While the engine's loop
/// runs, messages are queued for it. While it is stopped, the parked engine
/// handles them on the caller's thread. Once the engine is gone, messages
/// are dropped.
#[derive(Debug, Clone)]
pub struct DataSink {
    tx: mpsc::UnboundedSender<EngineMessage>,
    // `None` for a sink that only feeds a queue.
    parked: Option<Weak<Mutex<Option<ParkedCore>>>>,
}

impl DataSink {
    /// A sink feeding `tx` only.
    #[cfg(test)]
    pub(crate) const fn new(tx: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self { tx, parked: None }
    }

    /// A sink bound to an engine's queue and the slot its core parks in.
    pub(crate) const fn bound(
        tx: mpsc::UnboundedSender<EngineMessage>,
        parked: Weak<Mutex<Option<ParkedCore>>>,
    ) -> Self {
        Self {
            tx,
            parked: Some(parked),
        }
    }

    /// Deliver a response to a correlated request.
    pub fn send_response(&self, response: DataResponse) {
        self.push(EngineMessage::Response(response));
    }

    /// Report that a request could not be served.
    pub fn send_failure(
        &self,
        correlation_id: CorrelationId,
        client_id: ClientId,
        message: impl Into<String>,
    ) {
        self.push(EngineMessage::Failure {
            correlation_id,
            client_id,
            message: message.into(),
        });
    }

    /// Push a streaming event.
    pub fn send_data(&self, client_id: ClientId, data: Data) {
        self.push(EngineMessage::Data { client_id, data });
    }

    /// Report that the client lost its connection.
    pub fn connection_lost(&self, client_id: ClientId, reason: impl Into<String>) {
        self.push(EngineMessage::ConnectionLost {
            client_id,
            reason: reason.into(),
        });
    }

    /// Whether the engine behind this sink is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, message: EngineMessage) {
        let Some(parked) = &self.parked else {
            self.enqueue(message);
            return;
        };
        let Some(slot) = parked.upgrade() else {
            tracing::debug!("Engine gone, dropping message");
            return;
        };
        // Queue under the lock so a core parking meanwhile drains it.
        let mut slot = slot.lock();
        match slot.as_mut() {
            Some(core) => core.absorb(message),
            None => self.enqueue(message),
        }
    }

    fn enqueue(&self, message: EngineMessage) {
        if self.tx.send(message).is_err() {
            tracing::debug!("Engine inbound queue closed, dropping message");
        }
    }
}
