//! Configuration Module
//!
//! Engine configuration loaded from `LIVE_DATA_*` environment variables.

mod settings;

pub use settings::{ConfigError, EngineConfig, HubSettings, ServerSettings, SimSettings};
