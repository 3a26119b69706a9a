//! Bar specifications, bar types and aggregated bars.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::identifiers::{InstrumentId, ParseError};

/// The rule that closes a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarAggregation {
    /// A fixed number of ticks.
    Tick,
    /// A fixed traded volume.
    Volume,
    /// A fixed traded notional value.
    Value,
    /// Milliseconds of wall-clock time.
    Millisecond,
    /// Seconds of wall-clock time.
    Second,
    /// Minutes of wall-clock time.
    Minute,
    /// Hours of wall-clock time.
    Hour,
    /// Calendar days.
    Day,
}

impl BarAggregation {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "TICK",
            Self::Volume => "VOLUME",
            Self::Value => "VALUE",
            Self::Millisecond => "MILLISECOND",
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
            Self::Day => "DAY",
        }
    }
}

impl FromStr for BarAggregation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TICK" => Ok(Self::Tick),
            "VOLUME" => Ok(Self::Volume),
            "VALUE" => Ok(Self::Value),
            "MILLISECOND" => Ok(Self::Millisecond),
            "SECOND" => Ok(Self::Second),
            "MINUTE" => Ok(Self::Minute),
            "HOUR" => Ok(Self::Hour),
            "DAY" => Ok(Self::Day),
            _ => Err(ParseError::invalid(
                "BarAggregation",
                s,
                "unknown aggregation",
            )),
        }
    }
}

/// The price a bar is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    /// Best bid.
    Bid,
    /// Best ask.
    Ask,
    /// Mid point between bid and ask.
    Mid,
    /// Last traded price.
    Last,
}

impl PriceType {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "BID",
            Self::Ask => "ASK",
            Self::Mid => "MID",
            Self::Last => "LAST",
        }
    }
}

impl FromStr for PriceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BID" => Ok(Self::Bid),
            "ASK" => Ok(Self::Ask),
            "MID" => Ok(Self::Mid),
            "LAST" => Ok(Self::Last),
            _ => Err(ParseError::invalid("PriceType", s, "unknown price type")),
        }
    }
}

/// Step, aggregation and price type of a bar series, e.g. `100-TICK-LAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarSpecification {
    step: u64,
    aggregation: BarAggregation,
    price_type: PriceType,
}

impl BarSpecification {
    /// Create a bar specification.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if `step` is zero.
    pub fn new(
        step: u64,
        aggregation: BarAggregation,
        price_type: PriceType,
    ) -> Result<Self, ParseError> {
        if step == 0 {
            return Err(ParseError::invalid(
                "BarSpecification",
                format!("{step}-{}-{}", aggregation.as_str(), price_type.as_str()),
                "step must be positive",
            ));
        }
        Ok(Self {
            step,
            aggregation,
            price_type,
        })
    }

    /// Number of aggregation units per bar.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Aggregation rule.
    #[must_use]
    pub const fn aggregation(&self) -> BarAggregation {
        self.aggregation
    }

    /// Source price.
    #[must_use]
    pub const fn price_type(&self) -> PriceType {
        self.price_type
    }
}

impl fmt::Display for BarSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.step,
            self.aggregation.as_str(),
            self.price_type.as_str()
        )
    }
}

impl FromStr for BarSpecification {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (Some(step), Some(aggregation), Some(price_type)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::invalid(
                "BarSpecification",
                s,
                "expected '<step>-<AGGREGATION>-<PRICE_TYPE>'",
            ));
        };
        let step = step
            .parse::<u64>()
            .map_err(|e| ParseError::invalid("BarSpecification", s, e.to_string()))?;
        Self::new(step, aggregation.parse()?, price_type.parse()?)
    }
}

impl TryFrom<String> for BarSpecification {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarSpecification> for String {
    fn from(value: BarSpecification) -> Self {
        value.to_string()
    }
}

/// A bar series: an instrument plus a bar specification.
///
/// Canonical form `<instrument_id>-<spec>`, e.g.
/// `BTCUSDT.BINANCE-100-TICK-LAST`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarType {
    instrument_id: InstrumentId,
    spec: BarSpecification,
}

impl BarType {
    /// Create a bar type.
    #[must_use]
    pub const fn new(instrument_id: InstrumentId, spec: BarSpecification) -> Self {
        Self {
            instrument_id,
            spec,
        }
    }

    /// The instrument the bars aggregate.
    #[must_use]
    pub const fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }

    /// The bar specification.
    #[must_use]
    pub const fn spec(&self) -> BarSpecification {
        self.spec
    }
}

impl fmt::Display for BarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.instrument_id, self.spec)
    }
}

impl fmt::Debug for BarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BarType('{self}')")
    }
}

impl FromStr for BarType {
    type Err = ParseError;

    // Parsed from the right: instrument symbols may contain '-'.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(4, '-');
        let (Some(price_type), Some(aggregation), Some(step), Some(instrument_id)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::invalid(
                "BarType",
                s,
                "expected '<instrument_id>-<step>-<AGGREGATION>-<PRICE_TYPE>'",
            ));
        };
        let spec: BarSpecification = format!("{step}-{aggregation}-{price_type}").parse()?;
        Ok(Self::new(instrument_id.parse()?, spec))
    }
}

impl TryFrom<String> for BarType {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BarType> for String {
    fn from(value: BarType) -> Self {
        value.to_string()
    }
}

/// An aggregated OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Series this bar belongs to.
    pub bar_type: BarType,
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
    /// Bar close time.
    pub ts_event: DateTime<Utc>,
}
