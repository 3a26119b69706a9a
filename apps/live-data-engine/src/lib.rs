#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::similar_names
    )
)]

//! Live Data Engine - Market Data Dispatcher
//!
//! Routes subscriptions and historical data requests from strategies to
//! the data client registered for each venue, correlates the responses
//! clients deliver asynchronously and fans streaming events out to any
//! number of consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Value types and single-owner bookkeeping
//!   - `identifiers`: Validated identifiers (`Symbol`, `InstrumentId`, ...)
//!   - `data`: Instruments, ticks, bars and responses
//!   - `subscription`: Per-client subscription registry
//!   - `correlation`: Pending request table
//!
//! - **Application**: The engine and its ports
//!   - `ports`: `DataClient` trait and the `DataSink` callback handle
//!   - `engine`: Lifecycle, routing and the dispatch loop
//!
//! - **Infrastructure**: Adapters and operational surface
//!   - `broadcast`: Streaming fan-out channels
//!   - `sim`: Simulated data client
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!  caller ── subscribe / request ──► LiveDataEngine
//!                                        │ inbound queue
//!  DataClient ── DataSink ───────────────┤
//!      ▲                                 ▼
//!      └──────── routed calls ──── dispatch loop ──► PendingResponse
//!                                        │
//!                                        └──► DataHub ──► consumers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Identifiers, market data and engine bookkeeping.
pub mod domain;

/// Application layer - The engine and its ports.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::correlation::RequestError;
pub use domain::data::{
    AggressorSide, Bar, BarAggregation, BarSpecification, BarType, Data, DataResponse, Instrument,
    PriceType, QuoteTick, ResponsePayload, ResponseShape, TradeTick,
};
pub use domain::identifiers::{
    AccountId, ClientId, CorrelationId, ExecAlgorithmId, InstrumentId, ParseError, Symbol,
    TraderId, Venue,
};
pub use domain::subscription::{DataCategory, Subscription, SubscriptionStats};

// Engine
pub use application::engine::{
    ClientSnapshot, ConnectionState, DataRequest, EngineError, EngineState, EngineStatus,
    LiveDataEngine, PendingResponse,
};
pub use application::ports::{DataClient, DataClientError, DataSink};

// Data hub
pub use infrastructure::broadcast::{DataHub, HubConfig, HubStats, SharedDataHub};

// Simulated client
pub use infrastructure::sim::{SimCalls, SimulatedDataClient};

// Configuration
pub use infrastructure::config::{ConfigError, EngineConfig, HubSettings, ServerSettings, SimSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
