//! Domain Layer - Identifiers, market data and engine bookkeeping.
//!
//! This layer contains the value types and the single-owner state the
//! engine keeps: subscription registries and the correlation table. Nothing
//! here performs I/O.

/// Validated identifier value types.
pub mod identifiers;

/// Market data types (instruments, ticks, bars, responses).
pub mod data;

/// Per-client subscription tracking.
pub mod subscription;

/// Request/response correlation.
pub mod correlation;
