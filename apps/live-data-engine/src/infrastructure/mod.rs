//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete data clients, the streaming fan-out, configuration and the
//! operational surface (health, metrics, tracing).

/// Broadcast channels fanning streaming data out to consumers.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-process simulated data client.
pub mod sim;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
