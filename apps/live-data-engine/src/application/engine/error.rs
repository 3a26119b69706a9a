//! Engine errors.

use crate::application::ports::DataClientError;
use crate::domain::correlation::DuplicateCorrelation;
use crate::domain::identifiers::{ClientId, Venue};

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The operation needs a running engine.
    #[error("engine is not running")]
    NotRunning,

    /// `start` was called on a running engine, or registration was
    /// attempted while running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// The dispatch loop has not finished draining after `stop`.
    #[error("engine is still stopping")]
    Stopping,

    /// The engine has been disposed.
    #[error("engine has been disposed")]
    Disposed,

    /// No data client serves the venue.
    #[error("no data client registered for venue {0}")]
    NoClientForVenue(Venue),

    /// A broadcast request found no connected data client.
    #[error("no data clients are connected")]
    NoConnectedClients,

    /// A client with the same id or venue is already registered.
    #[error("data client {client_id} for venue {venue} conflicts with a registered client")]
    DuplicateClient {
        /// Client being registered.
        client_id: ClientId,
        /// Its venue.
        venue: Venue,
    },

    /// The correlation token is already pending.
    #[error(transparent)]
    DuplicateCorrelation(#[from] DuplicateCorrelation),

    /// The data client rejected the call.
    #[error("data client {client_id} error: {source}")]
    Client {
        /// Client that failed.
        client_id: ClientId,
        /// Underlying error.
        #[source]
        source: DataClientError,
    },

    /// The dispatch loop ended without answering.
    #[error("engine dispatch loop terminated unexpectedly")]
    LoopTerminated,
}

impl EngineError {
    pub(crate) const fn client(client_id: ClientId, source: DataClientError) -> Self {
        Self::Client { client_id, source }
    }
}
