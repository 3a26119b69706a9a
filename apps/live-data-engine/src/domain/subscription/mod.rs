//! Subscription Registry
//!
//! Tracks which streams a single data client has been asked to deliver.
//! The engine keeps one registry per client: it consults the registry
//! before publishing an inbound streaming event and replays it to the
//! client after every (re)connect.
//!
//! # Design
//!
//! A subscription is a data category plus an optional key. A key names a
//! single instrument or bar series; no key means every instrument the
//! venue lists. Add and remove are idempotent and report whether the
//! registry changed, so the engine forwards a request to the client only
//! on a real transition.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::domain::data::{BarType, Data};
use crate::domain::identifiers::{InstrumentId, Venue};

// =============================================================================
// Types
// =============================================================================

/// Category of streaming market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    /// Instrument definitions.
    Instrument,
    /// Quote ticks.
    Quotes,
    /// Trade ticks.
    Trades,
    /// Bars.
    Bars,
}

impl DataCategory {
    /// Get all categories.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Instrument, Self::Quotes, Self::Trades, Self::Bars]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Instrument => "instrument",
            Self::Quotes => "quotes",
            Self::Trades => "trades",
            Self::Bars => "bars",
        }
    }
}

/// What a subscription is keyed on within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    /// A single instrument.
    Instrument(InstrumentId),
    /// A single bar series.
    Bar(BarType),
}

/// A (category, key) pair routed to the venue's data client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    category: DataCategory,
    venue: Venue,
    key: Option<SubscriptionKey>,
}

impl Subscription {
    /// Definition updates for one instrument.
    #[must_use]
    pub fn instrument(instrument_id: &InstrumentId) -> Self {
        Self::keyed(DataCategory::Instrument, instrument_id)
    }

    /// Definition updates for every instrument on a venue.
    #[must_use]
    pub const fn instruments(venue: Venue) -> Self {
        Self {
            category: DataCategory::Instrument,
            venue,
            key: None,
        }
    }

    /// Quote ticks for one instrument.
    #[must_use]
    pub fn quotes(instrument_id: &InstrumentId) -> Self {
        Self::keyed(DataCategory::Quotes, instrument_id)
    }

    /// Trade ticks for one instrument.
    #[must_use]
    pub fn trades(instrument_id: &InstrumentId) -> Self {
        Self::keyed(DataCategory::Trades, instrument_id)
    }

    /// Bars for one bar series.
    #[must_use]
    pub fn bars(bar_type: &BarType) -> Self {
        Self {
            category: DataCategory::Bars,
            venue: bar_type.instrument_id().venue().clone(),
            key: Some(SubscriptionKey::Bar(bar_type.clone())),
        }
    }

    fn keyed(category: DataCategory, instrument_id: &InstrumentId) -> Self {
        Self {
            category,
            venue: instrument_id.venue().clone(),
            key: Some(SubscriptionKey::Instrument(instrument_id.clone())),
        }
    }

    /// Data category.
    #[must_use]
    pub const fn category(&self) -> DataCategory {
        self.category
    }

    /// Venue whose client serves this subscription.
    #[must_use]
    pub const fn venue(&self) -> &Venue {
        &self.venue
    }

    /// Key within the category, `None` for venue-wide subscriptions.
    #[must_use]
    pub const fn key(&self) -> Option<&SubscriptionKey> {
        self.key.as_ref()
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(SubscriptionKey::Instrument(id)) => write!(f, "{}:{id}", self.category.as_str()),
            Some(SubscriptionKey::Bar(bar_type)) => {
                write!(f, "{}:{bar_type}", self.category.as_str())
            }
            None => write!(f, "{}:*.{}", self.category.as_str(), self.venue),
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Subscriptions held by one data client.
///
/// Owned by the engine's dispatch loop, so it carries no locking.
///
/// # Example
///
/// ```rust
/// use live_data_engine::domain::subscription::{Subscription, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let id = "BTCUSDT.BINANCE".parse().unwrap();
///
/// assert!(registry.add(Subscription::quotes(&id)));
/// assert!(!registry.add(Subscription::quotes(&id)));
/// assert!(registry.contains(&Subscription::quotes(&id)));
///
/// assert!(registry.remove(&Subscription::quotes(&id)));
/// assert!(!registry.remove(&Subscription::quotes(&id)));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_category: HashMap<DataCategory, HashSet<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns `true` if it was not already present.
    pub fn add(&mut self, subscription: Subscription) -> bool {
        self.by_category
            .entry(subscription.category)
            .or_default()
            .insert(subscription)
    }

    /// Remove a subscription. Returns `true` if it was present.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let Some(entries) = self.by_category.get_mut(&subscription.category) else {
            return false;
        };
        let removed = entries.remove(subscription);
        if entries.is_empty() {
            self.by_category.remove(&subscription.category);
        }
        removed
    }

    /// Whether the subscription is present.
    #[must_use]
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.by_category
            .get(&subscription.category)
            .is_some_and(|entries| entries.contains(subscription))
    }

    /// Whether a streaming event has a live subscription.
    ///
    /// Instrument updates also match a venue-wide instruments subscription.
    #[must_use]
    pub fn accepts(&self, data: &Data) -> bool {
        match data {
            Data::Instrument(instrument) => {
                self.contains(&Subscription::instrument(&instrument.id))
                    || self.contains(&Subscription::instruments(
                        instrument.id.venue().clone(),
                    ))
            }
            Data::Quote(quote) => self.contains(&Subscription::quotes(&quote.instrument_id)),
            Data::Trade(trade) => self.contains(&Subscription::trades(&trade.instrument_id)),
            Data::Bar(bar) => self.contains(&Subscription::bars(&bar.bar_type)),
        }
    }

    /// Iterate over every subscription.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.by_category.values().flatten()
    }

    /// Total number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_category.values().map(HashSet::len).sum()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.by_category.clear();
    }

    /// Count subscriptions in one category.
    #[must_use]
    pub fn count(&self, category: DataCategory) -> usize {
        self.by_category.get(&category).map_or(0, HashSet::len)
    }

    /// Per-category statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            instruments: self.count(DataCategory::Instrument),
            quotes: self.count(DataCategory::Quotes),
            trades: self.count(DataCategory::Trades),
            bars: self.count(DataCategory::Bars),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Instrument subscriptions.
    pub instruments: usize,
    /// Quote subscriptions.
    pub quotes: usize,
    /// Trade subscriptions.
    pub trades: usize,
    /// Bar subscriptions.
    pub bars: usize,
}

impl SubscriptionStats {
    /// Total across categories.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.instruments + self.quotes + self.trades + self.bars
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::data::{Instrument, QuoteTick};

    fn btc() -> InstrumentId {
        "BTCUSDT.BINANCE".parse().unwrap()
    }

    fn eth() -> InstrumentId {
        "ETHUSDT.BINANCE".parse().unwrap()
    }

    fn quote(instrument_id: InstrumentId) -> Data {
        Data::Quote(QuoteTick {
            instrument_id,
            bid_price: Decimal::ONE,
            ask_price: Decimal::TWO,
            bid_size: Decimal::ONE,
            ask_size: Decimal::ONE,
            ts_event: Utc::now(),
        })
    }

    #[test]
    fn add_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.add(Subscription::quotes(&btc())));
        assert!(!registry.add(Subscription::quotes(&btc())));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.remove(&Subscription::trades(&btc())));
        assert!(registry.is_empty());

        registry.add(Subscription::trades(&btc()));
        assert!(registry.remove(&Subscription::trades(&btc())));
        assert!(!registry.remove(&Subscription::trades(&btc())));
        assert!(registry.is_empty());
    }

    #[test]
    fn categories_are_independent() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Subscription::quotes(&btc()));
        assert!(!registry.contains(&Subscription::trades(&btc())));
        assert!(!registry.contains(&Subscription::quotes(&eth())));
    }

    #[test]
    fn accepts_only_subscribed_events() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Subscription::quotes(&btc()));
        assert!(registry.accepts(&quote(btc())));
        assert!(!registry.accepts(&quote(eth())));
    }

    #[test]
    fn venue_wide_instruments_accept_any_instrument() {
        let mut registry = SubscriptionRegistry::new();
        let venue = Venue::new("BINANCE").unwrap();
        registry.add(Subscription::instruments(venue));

        let update = Data::Instrument(Instrument::new(eth(), 2, 4));
        assert!(registry.accepts(&update));

        let other = Data::Instrument(Instrument::new("AUD/USD.SIM".parse().unwrap(), 5, 0));
        assert!(!registry.accepts(&other));
    }

    #[test]
    fn bars_are_keyed_by_bar_type() {
        let mut registry = SubscriptionRegistry::new();
        let one_minute: BarType = "BTCUSDT.BINANCE-1-MINUTE-LAST".parse().unwrap();
        let hundred_ticks: BarType = "BTCUSDT.BINANCE-100-TICK-LAST".parse().unwrap();
        registry.add(Subscription::bars(&one_minute));

        assert!(registry.contains(&Subscription::bars(&one_minute)));
        assert!(!registry.contains(&Subscription::bars(&hundred_ticks)));
        assert_eq!(Subscription::bars(&one_minute).venue().as_str(), "BINANCE");
    }

    #[test]
    fn stats_and_clear() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(Subscription::quotes(&btc()));
        registry.add(Subscription::quotes(&eth()));
        registry.add(Subscription::trades(&btc()));
        registry.add(Subscription::instrument(&btc()));

        let stats = registry.stats();
        assert_eq!(stats.quotes, 2);
        assert_eq!(stats.trades, 1);
        assert_eq!(stats.instruments, 1);
        assert_eq!(stats.total(), 4);
        assert_eq!(registry.iter().count(), 4);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn display_forms() {
        assert_eq!(
            Subscription::quotes(&btc()).to_string(),
            "quotes:BTCUSDT.BINANCE"
        );
        assert_eq!(
            Subscription::instruments(Venue::new("SIM").unwrap()).to_string(),
            "instrument:*.SIM"
        );
    }
}
