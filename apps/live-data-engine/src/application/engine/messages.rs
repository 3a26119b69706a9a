//! Messages carried by the engine's inbound queue.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::EngineError;
use crate::domain::correlation::ResponseWaiter;
use crate::domain::data::{BarType, Data, DataResponse, ResponseShape};
use crate::domain::identifiers::{ClientId, CorrelationId, InstrumentId, Venue};
use crate::domain::subscription::Subscription;

/// A historical data request addressed through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    /// One instrument definition.
    Instrument {
        /// Instrument to fetch.
        instrument_id: InstrumentId,
        /// Caller's token.
        correlation_id: CorrelationId,
    },
    /// Every instrument from every connected client.
    Instruments {
        /// Caller's token.
        correlation_id: CorrelationId,
    },
    /// Historical trades.
    Trades {
        /// Instrument to fetch.
        instrument_id: InstrumentId,
        /// Inclusive lower bound.
        start: Option<DateTime<Utc>>,
        /// Inclusive upper bound.
        end: Option<DateTime<Utc>>,
        /// Maximum count, 0 for no limit.
        limit: usize,
        /// Caller's token.
        correlation_id: CorrelationId,
    },
    /// Historical bars.
    Bars {
        /// Bar series to fetch.
        bar_type: BarType,
        /// Inclusive lower bound.
        start: Option<DateTime<Utc>>,
        /// Inclusive upper bound.
        end: Option<DateTime<Utc>>,
        /// Maximum count, 0 for no limit.
        limit: usize,
        /// Caller's token.
        correlation_id: CorrelationId,
    },
}

impl DataRequest {
    /// The caller's token.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Instrument { correlation_id, .. }
            | Self::Instruments { correlation_id }
            | Self::Trades { correlation_id, .. }
            | Self::Bars { correlation_id, .. } => *correlation_id,
        }
    }

    /// Shape of the expected response.
    #[must_use]
    pub const fn shape(&self) -> ResponseShape {
        match self {
            Self::Instrument { .. } => ResponseShape::Instrument,
            Self::Instruments { .. } => ResponseShape::Instruments,
            Self::Trades { .. } => ResponseShape::Trades,
            Self::Bars { .. } => ResponseShape::Bars,
        }
    }

    /// Venue the request routes to; `None` for broadcast requests.
    #[must_use]
    pub const fn venue(&self) -> Option<&Venue> {
        match self {
            Self::Instrument { instrument_id, .. } | Self::Trades { instrument_id, .. } => {
                Some(instrument_id.venue())
            }
            Self::Bars { bar_type, .. } => Some(bar_type.instrument_id().venue()),
            Self::Instruments { .. } => None,
        }
    }
}

pub(crate) type Ack = oneshot::Sender<Result<(), EngineError>>;

/// Calls made through the engine handle.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    Connect(Ack),
    Disconnect(Ack),
    Reset(Ack),
    Subscribe {
        subscription: Subscription,
        ack: Ack,
    },
    Unsubscribe {
        subscription: Subscription,
        ack: Ack,
    },
    Request {
        request: DataRequest,
        waiter: ResponseWaiter,
        ack: Ack,
    },
}

impl EngineCommand {
    pub(crate) const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Reset(_) => "reset",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Request { .. } => "request",
        }
    }

    /// Drop the payload, keeping the reply channel.
    pub(crate) fn into_ack(self) -> Ack {
        match self {
            Self::Connect(ack) | Self::Disconnect(ack) | Self::Reset(ack) => ack,
            Self::Subscribe { ack, .. }
            | Self::Unsubscribe { ack, .. }
            | Self::Request { ack, .. } => ack,
        }
    }
}

/// Everything the dispatch loop consumes, in arrival order.
#[derive(Debug)]
pub(crate) enum EngineMessage {
    Command(EngineCommand),
    Response(DataResponse),
    Failure {
        correlation_id: CorrelationId,
        client_id: ClientId,
        message: String,
    },
    Data {
        client_id: ClientId,
        data: Data,
    },
    ConnectionLost {
        client_id: ClientId,
        reason: String,
    },
}
