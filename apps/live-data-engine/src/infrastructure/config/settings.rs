//! Engine Configuration Settings
//!
//! Configuration types for the engine binary, loaded from environment
//! variables. Unset or unparseable numeric values fall back to defaults;
//! venue lists are validated.

use std::time::Duration;

use crate::domain::identifiers::Venue;

/// Data hub channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Capacity of the instrument update channel.
    pub instruments_capacity: usize,
    /// Capacity of the quote channel.
    pub quotes_capacity: usize,
    /// Capacity of the trade channel.
    pub trades_capacity: usize,
    /// Capacity of the bar channel.
    pub bars_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            instruments_capacity: 1_000,
            quotes_capacity: 10_000,
            trades_capacity: 10_000,
            bars_capacity: 1_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Simulated venue settings for the demo binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSettings {
    /// One simulated data client is registered per venue.
    pub venues: Vec<Venue>,
    /// Delay before a simulated response is delivered.
    pub latency: Duration,
    /// Interval between generated quotes.
    pub quote_interval: Duration,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            venues: Venue::new("SIM").into_iter().collect(),
            latency: Duration::from_millis(5),
            quote_interval: Duration::from_secs(1),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Data hub capacities.
    pub hub: HubSettings,
    /// Simulated venues.
    pub sim: SimSettings,
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `LIVE_DATA_SIM_VENUES` is empty or names an
    /// invalid venue.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// As [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server = ServerSettings {
            health_port: parse_env_u16(
                &lookup,
                "LIVE_DATA_HEALTH_PORT",
                defaults.server.health_port,
            ),
        };

        let hub = HubSettings {
            instruments_capacity: parse_env_usize(
                &lookup,
                "LIVE_DATA_INSTRUMENTS_CAPACITY",
                defaults.hub.instruments_capacity,
            ),
            quotes_capacity: parse_env_usize(
                &lookup,
                "LIVE_DATA_QUOTES_CAPACITY",
                defaults.hub.quotes_capacity,
            ),
            trades_capacity: parse_env_usize(
                &lookup,
                "LIVE_DATA_TRADES_CAPACITY",
                defaults.hub.trades_capacity,
            ),
            bars_capacity: parse_env_usize(
                &lookup,
                "LIVE_DATA_BARS_CAPACITY",
                defaults.hub.bars_capacity,
            ),
        };

        let venues = match lookup("LIVE_DATA_SIM_VENUES") {
            Some(raw) => parse_venues("LIVE_DATA_SIM_VENUES", &raw)?,
            None => defaults.sim.venues,
        };

        let sim = SimSettings {
            venues,
            latency: parse_env_duration_millis(
                &lookup,
                "LIVE_DATA_SIM_LATENCY_MS",
                defaults.sim.latency,
            ),
            quote_interval: parse_env_duration_millis(
                &lookup,
                "LIVE_DATA_SIM_QUOTE_INTERVAL_MS",
                defaults.sim.quote_interval,
            ),
        };

        Ok(Self { server, hub, sim })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

fn parse_venues(key: &str, raw: &str) -> Result<Vec<Venue>, ConfigError> {
    let venues = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            Venue::new(part).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                value: part.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if venues.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(venues)
}

fn parse_env_u16(lookup: impl Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(lookup: impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
