//! Instrument identifiers: a symbol traded on a venue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{ParseError, Symbol, Venue};

/// Identifies an instrument by its symbol and venue.
///
/// The canonical form is `<symbol>.<venue>`, e.g. `ETHUSDT-PERP.BINANCE`.
/// Parsing splits on the *last* `.`, so composite symbols such as
/// `ES.c.0.GLBX` keep their inner separators.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId {
    symbol: Symbol,
    venue: Venue,
}

impl InstrumentId {
    /// Create an instrument id from validated components.
    #[must_use]
    pub const fn new(symbol: Symbol, venue: Venue) -> Self {
        Self { symbol, venue }
    }

    /// The instrument's symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// The venue the instrument trades on.
    #[must_use]
    pub const fn venue(&self) -> &Venue {
        &self.venue
    }
}

impl FromStr for InstrumentId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, venue) = s
            .rsplit_once('.')
            .ok_or_else(|| ParseError::MissingSeparator(s.to_string()))?;
        Ok(Self::new(Symbol::new(symbol)?, Venue::new(venue)?))
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&str> for InstrumentId {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstrumentId> for String {
    fn from(value: InstrumentId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.symbol, self.venue)
    }
}

impl fmt::Debug for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrumentId('{self}')")
    }
}
