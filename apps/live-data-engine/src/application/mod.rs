//! Application Layer - The engine and its port definitions.
//!
//! This layer contains the dispatch engine and the port interfaces that
//! define how venue data clients plug into it.

/// Port interfaces for venue data clients.
pub mod ports;

/// The live data engine: lifecycle, routing and request correlation.
pub mod engine;
