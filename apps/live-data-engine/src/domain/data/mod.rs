//! Market Data Types
//!
//! Canonical internal representation of the instruments, ticks and bars
//! data clients deliver, plus the response envelope used to answer
//! correlated requests.

mod bar;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use bar::{Bar, BarAggregation, BarSpecification, BarType, PriceType};

use crate::domain::identifiers::{ClientId, CorrelationId, InstrumentId};

// =============================================================================
// Instruments and Ticks
// =============================================================================

/// Largest scale a `Decimal` can carry.
const MAX_PRECISION: u8 = 28;

/// Definition of a tradeable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument identifier.
    pub id: InstrumentId,
    /// Decimal places of a price.
    pub price_precision: u8,
    /// Decimal places of a size.
    pub size_precision: u8,
    /// Minimum price movement.
    pub price_increment: Decimal,
    /// Minimum size movement.
    pub size_increment: Decimal,
    /// When the definition was created.
    pub ts_init: DateTime<Utc>,
}

impl Instrument {
    /// Create an instrument whose increments are one unit of each precision.
    #[must_use]
    pub fn new(id: InstrumentId, price_precision: u8, size_precision: u8) -> Self {
        Self {
            id,
            price_precision,
            size_precision,
            price_increment: Decimal::new(1, u32::from(price_precision.min(MAX_PRECISION))),
            size_increment: Decimal::new(1, u32::from(size_precision.min(MAX_PRECISION))),
            ts_init: Utc::now(),
        }
    }
}

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTick {
    /// Quoted instrument.
    pub instrument_id: InstrumentId,
    /// Best bid price.
    pub bid_price: Decimal,
    /// Best ask price.
    pub ask_price: Decimal,
    /// Size at the best bid.
    pub bid_size: Decimal,
    /// Size at the best ask.
    pub ask_size: Decimal,
    /// Venue timestamp.
    pub ts_event: DateTime<Utc>,
}

/// Side that initiated a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggressorSide {
    /// Aggressor not reported.
    NoAggressor,
    /// Buyer lifted the offer.
    Buyer,
    /// Seller hit the bid.
    Seller,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Traded instrument.
    pub instrument_id: InstrumentId,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub size: Decimal,
    /// Aggressor side.
    pub aggressor_side: AggressorSide,
    /// Venue trade identifier.
    pub trade_id: String,
    /// Venue timestamp.
    pub ts_event: DateTime<Utc>,
}

// =============================================================================
// Streaming Events
// =============================================================================

/// A streaming market data event pushed by a data client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Data {
    /// Instrument definition update.
    Instrument(Instrument),
    /// Quote update.
    Quote(QuoteTick),
    /// Trade print.
    Trade(TradeTick),
    /// Closed bar.
    Bar(Bar),
}

impl Data {
    /// The instrument the event concerns.
    #[must_use]
    pub const fn instrument_id(&self) -> &InstrumentId {
        match self {
            Self::Instrument(instrument) => &instrument.id,
            Self::Quote(quote) => &quote.instrument_id,
            Self::Trade(trade) => &trade.instrument_id,
            Self::Bar(bar) => bar.bar_type.instrument_id(),
        }
    }

    /// Short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Instrument(_) => "instrument",
            Self::Quote(_) => "quote",
            Self::Trade(_) => "trade",
            Self::Bar(_) => "bar",
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Payload of a response to a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// A single instrument definition.
    Instrument(Instrument),
    /// A set of instrument definitions.
    Instruments(Vec<Instrument>),
    /// Historical trades.
    Trades(Vec<TradeTick>),
    /// Historical bars.
    Bars(Vec<Bar>),
}

impl ResponsePayload {
    /// The shape of this payload.
    #[must_use]
    pub const fn shape(&self) -> ResponseShape {
        match self {
            Self::Instrument(_) => ResponseShape::Instrument,
            Self::Instruments(_) => ResponseShape::Instruments,
            Self::Trades(_) => ResponseShape::Trades,
            Self::Bars(_) => ResponseShape::Bars,
        }
    }
}

/// Expected shape of a response, recorded when a request is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    /// One instrument.
    Instrument,
    /// Many instruments.
    Instruments,
    /// Trade history.
    Trades,
    /// Bar history.
    Bars,
}

impl ResponseShape {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Instrument => "instrument",
            Self::Instruments => "instruments",
            Self::Trades => "trades",
            Self::Bars => "bars",
        }
    }
}

impl fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response delivered for a correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse {
    /// Token of the request being answered.
    pub correlation_id: CorrelationId,
    /// Responding client; `None` when merged from several clients.
    pub client_id: Option<ClientId>,
    /// Response data.
    pub payload: ResponsePayload,
    /// When the response was created.
    pub ts_init: DateTime<Utc>,
}

impl DataResponse {
    /// Create a response from a single data client.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        client_id: ClientId,
        payload: ResponsePayload,
    ) -> Self {
        Self {
            correlation_id,
            client_id: Some(client_id),
            payload,
            ts_init: Utc::now(),
        }
    }

    pub(crate) fn merged(correlation_id: CorrelationId, payload: ResponsePayload) -> Self {
        Self {
            correlation_id,
            client_id: None,
            payload,
            ts_init: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument_id() -> InstrumentId {
        "BTCUSDT.BINANCE".parse().unwrap()
    }

    #[test]
    fn instrument_increments_follow_precision() {
        let instrument = Instrument::new(instrument_id(), 2, 6);
        assert_eq!(instrument.price_increment, Decimal::new(1, 2));
        assert_eq!(instrument.size_increment.to_string(), "0.000001");
    }

    #[test]
    fn data_reports_instrument_id() {
        let quote = QuoteTick {
            instrument_id: instrument_id(),
            bid_price: Decimal::new(50_000, 0),
            ask_price: Decimal::new(50_001, 0),
            bid_size: Decimal::ONE,
            ask_size: Decimal::ONE,
            ts_event: Utc::now(),
        };
        assert_eq!(Data::Quote(quote).instrument_id(), &instrument_id());
    }

    #[test]
    fn payload_shape() {
        assert_eq!(
            ResponsePayload::Instruments(vec![]).shape(),
            ResponseShape::Instruments
        );
        assert_eq!(ResponsePayload::Bars(vec![]).shape(), ResponseShape::Bars);
        assert_eq!(ResponseShape::Trades.to_string(), "trades");
    }

    #[test]
    fn response_serializes_with_tagged_payload() {
        let client_id = ClientId::new("BINANCE").unwrap();
        let response = DataResponse::new(
            CorrelationId::new(),
            client_id,
            ResponsePayload::Trades(vec![]),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["payload"]["type"], "trades");
        assert_eq!(json["client_id"], "BINANCE");
    }
}
