//! Data Hub
//!
//! Fans streaming market data out to any number of consumers using tokio
//! broadcast channels, one per data category. The engine publishes only
//! events that have a live subscription; consumers subscribe to the
//! channels they care about.
//!
//! A consumer that falls more than a channel's capacity behind receives
//! `RecvError::Lagged` and skips ahead; the engine never blocks on a slow
//! consumer.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::data::{Bar, Data, Instrument, QuoteTick, TradeTick};
use crate::infrastructure::config::HubSettings;

// =============================================================================
// Configuration
// =============================================================================

/// Capacities of the hub's broadcast channels.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Capacity for instrument updates.
    pub instruments_capacity: usize,
    /// Capacity for quote ticks.
    pub quotes_capacity: usize,
    /// Capacity for trade ticks.
    pub trades_capacity: usize,
    /// Capacity for bars.
    pub bars_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            instruments_capacity: 1_000,
            quotes_capacity: 10_000,
            trades_capacity: 10_000,
            bars_capacity: 1_000,
        }
    }
}

impl From<HubSettings> for HubConfig {
    fn from(settings: HubSettings) -> Self {
        Self {
            instruments_capacity: settings.instruments_capacity,
            quotes_capacity: settings.quotes_capacity,
            trades_capacity: settings.trades_capacity,
            bars_capacity: settings.bars_capacity,
        }
    }
}

// =============================================================================
// Data Hub
// =============================================================================

/// Broadcast channels for streaming market data.
///
/// # Example
///
/// ```rust
/// use live_data_engine::infrastructure::broadcast::{DataHub, HubConfig};
///
/// let hub = DataHub::new(HubConfig::default());
/// let _quotes = hub.quotes_rx();
/// assert_eq!(hub.stats().quotes_receivers, 1);
/// ```
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct DataHub {
    instruments_tx: broadcast::Sender<Instrument>,
    quotes_tx: broadcast::Sender<QuoteTick>,
    trades_tx: broadcast::Sender<TradeTick>,
    bars_tx: broadcast::Sender<Bar>,
}

impl DataHub {
    /// Create a hub with the given capacities. Zero capacities are raised
    /// to one.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            instruments_tx: broadcast::channel(config.instruments_capacity.max(1)).0,
            quotes_tx: broadcast::channel(config.quotes_capacity.max(1)).0,
            trades_tx: broadcast::channel(config.trades_capacity.max(1)).0,
            bars_tx: broadcast::channel(config.bars_capacity.max(1)).0,
        }
    }

    /// Create a hub with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    /// Publish an event on its category's channel.
    ///
    /// Returns the number of receivers reached, or `None` if the channel
    /// has no receivers.
    #[must_use]
    pub fn publish(&self, data: Data) -> Option<usize> {
        match data {
            Data::Instrument(instrument) => self.instruments_tx.send(instrument).ok(),
            Data::Quote(quote) => self.quotes_tx.send(quote).ok(),
            Data::Trade(trade) => self.trades_tx.send(trade).ok(),
            Data::Bar(bar) => self.bars_tx.send(bar).ok(),
        }
    }

    /// Get a new receiver for instrument updates.
    #[must_use]
    pub fn instruments_rx(&self) -> broadcast::Receiver<Instrument> {
        self.instruments_tx.subscribe()
    }

    /// Get a new receiver for quote ticks.
    #[must_use]
    pub fn quotes_rx(&self) -> broadcast::Receiver<QuoteTick> {
        self.quotes_tx.subscribe()
    }

    /// Get a new receiver for trade ticks.
    #[must_use]
    pub fn trades_rx(&self) -> broadcast::Receiver<TradeTick> {
        self.trades_tx.subscribe()
    }

    /// Get a new receiver for bars.
    #[must_use]
    pub fn bars_rx(&self) -> broadcast::Receiver<Bar> {
        self.bars_tx.subscribe()
    }

    /// Receiver counts per channel.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            instruments_receivers: self.instruments_tx.receiver_count(),
            quotes_receivers: self.quotes_tx.receiver_count(),
            trades_receivers: self.trades_tx.receiver_count(),
            bars_receivers: self.bars_tx.receiver_count(),
        }
    }
}

/// Shared data hub reference.
pub type SharedDataHub = Arc<DataHub>;

/// Receiver counts per channel.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct HubStats {
    /// Instrument receivers.
    pub instruments_receivers: usize,
    /// Quote receivers.
    pub quotes_receivers: usize,
    /// Trade receivers.
    pub trades_receivers: usize,
    /// Bar receivers.
    pub bars_receivers: usize,
}

impl HubStats {
    /// Total receivers across channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.instruments_receivers
            + self.quotes_receivers
            + self.trades_receivers
            + self.bars_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio::sync::broadcast::error::RecvError;

    use super::*;
    use crate::domain::data::AggressorSide;

    fn trade(price: i64) -> TradeTick {
        TradeTick {
            instrument_id: "BTCUSDT.BINANCE".parse().unwrap(),
            price: Decimal::new(price, 0),
            size: Decimal::ONE,
            aggressor_side: AggressorSide::Buyer,
            trade_id: price.to_string(),
            ts_event: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_none() {
        let hub = DataHub::with_defaults();
        assert!(hub.publish(Data::Trade(trade(1))).is_none());
    }

    #[tokio::test]
    async fn publish_reaches_every_receiver() {
        let hub = DataHub::with_defaults();
        let mut first = hub.trades_rx();
        let mut second = hub.trades_rx();

        assert_eq!(hub.publish(Data::Trade(trade(42))), Some(2));
        assert_eq!(first.recv().await.unwrap().price, Decimal::new(42, 0));
        assert_eq!(second.recv().await.unwrap().price, Decimal::new(42, 0));
    }

    #[tokio::test]
    async fn slow_receiver_lags_instead_of_blocking() {
        let hub = DataHub::new(HubConfig {
            trades_capacity: 2,
            ..HubConfig::default()
        });
        let mut rx = hub.trades_rx();
        for price in 0..5 {
            let _ = hub.publish(Data::Trade(trade(price)));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().price, Decimal::new(3, 0));
    }

    #[test]
    fn stats_count_receivers() {
        let hub = DataHub::with_defaults();
        let _quotes = hub.quotes_rx();
        let _bars = hub.bars_rx();
        let stats = hub.stats();
        assert_eq!(stats.quotes_receivers, 1);
        assert_eq!(stats.bars_receivers, 1);
        assert_eq!(stats.total_receivers(), 2);
    }
}
