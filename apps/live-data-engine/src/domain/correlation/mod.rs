//! Correlation Table
//!
//! Pairs outstanding requests with the responses data clients deliver
//! later, from their own tasks. Each entry holds the caller's one-shot
//! waiter, the response shape it expects and the clients still owing a
//! response. Entries leave the table exactly once: resolved, failed or
//! expired.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::domain::data::{DataResponse, Instrument, ResponsePayload, ResponseShape};
use crate::domain::identifiers::{ClientId, CorrelationId};

// =============================================================================
// Errors
// =============================================================================

/// Why a request completed without data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The addressed client disconnected before responding.
    #[error("connection lost: data client {client_id} disconnected before responding")]
    AdapterDisconnected {
        /// Client that disconnected.
        client_id: ClientId,
    },

    /// The client reported that it could not serve the request.
    #[error("data client {client_id} failed request: {message}")]
    ClientFailure {
        /// Client that failed.
        client_id: ClientId,
        /// Client-supplied reason.
        message: String,
    },

    /// The client answered with a payload of the wrong shape.
    #[error("unexpected response from {client_id}: expected {expected}, received {received}")]
    UnexpectedResponse {
        /// Client that answered.
        client_id: ClientId,
        /// Shape the request expects.
        expected: ResponseShape,
        /// Shape actually received.
        received: ResponseShape,
    },

    /// The engine was disposed while the request was outstanding.
    #[error("engine disposed before the request completed")]
    EngineDisposed,

    /// The pending entry was dropped without an answer.
    #[error("request abandoned before a response was delivered")]
    Abandoned,
}

/// A token was already registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("correlation id {0} is already pending")]
pub struct DuplicateCorrelation(pub CorrelationId);

/// Caller side of a pending request.
pub type ResponseWaiter = oneshot::Sender<Result<DataResponse, RequestError>>;

// =============================================================================
// Pending Request
// =============================================================================

/// An outstanding request awaiting one response per addressed client.
#[derive(Debug)]
pub struct PendingRequest {
    correlation_id: CorrelationId,
    shape: ResponseShape,
    waiter: ResponseWaiter,
    awaiting: HashSet<ClientId>,
    partial: Vec<Instrument>,
    broadcast: bool,
    created_at: DateTime<Utc>,
}

impl PendingRequest {
    /// A request addressed to a single client.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        shape: ResponseShape,
        client_id: ClientId,
        waiter: ResponseWaiter,
    ) -> Self {
        Self {
            correlation_id,
            shape,
            waiter,
            awaiting: HashSet::from([client_id]),
            partial: Vec::new(),
            broadcast: false,
            created_at: Utc::now(),
        }
    }

    /// An instruments request broadcast to several clients. The waiter
    /// receives one merged response once every client has answered.
    #[must_use]
    pub fn broadcast(
        correlation_id: CorrelationId,
        clients: impl IntoIterator<Item = ClientId>,
        waiter: ResponseWaiter,
    ) -> Self {
        Self {
            correlation_id,
            shape: ResponseShape::Instruments,
            waiter,
            awaiting: clients.into_iter().collect(),
            partial: Vec::new(),
            broadcast: true,
            created_at: Utc::now(),
        }
    }

    /// Token of the request.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Expected response shape.
    #[must_use]
    pub const fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Whether the request still waits on `client_id`.
    #[must_use]
    pub fn awaits(&self, client_id: &ClientId) -> bool {
        self.awaiting.contains(client_id)
    }

    /// When the request was registered.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // A dropped receiver means the caller stopped waiting; nothing to do.
    fn complete(self, result: Result<DataResponse, RequestError>) {
        if self.waiter.send(result).is_err() {
            tracing::debug!(
                correlation_id = %self.correlation_id,
                "Requester dropped before response delivery"
            );
        }
    }
}

// =============================================================================
// Correlation Table
// =============================================================================

/// Result of offering a response to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The response completed its request and was delivered.
    Delivered,
    /// The response was recorded; other clients still owe theirs.
    Partial {
        /// Clients still outstanding.
        remaining: usize,
    },
    /// No pending request matched the token and client.
    Unknown,
}

impl Resolution {
    /// Whether the response matched a pending request.
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Outstanding requests keyed by correlation token.
///
/// Owned by the engine's dispatch loop, so it carries no locking.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateCorrelation`] if the token is already pending. The
    /// existing entry is left untouched and the rejected waiter is dropped.
    pub fn register(&mut self, request: PendingRequest) -> Result<(), DuplicateCorrelation> {
        let correlation_id = request.correlation_id;
        if self.pending.contains_key(&correlation_id) {
            return Err(DuplicateCorrelation(correlation_id));
        }
        self.pending.insert(correlation_id, request);
        Ok(())
    }

    /// Offer a client's response.
    ///
    /// A response from a client the request does not await is treated as
    /// unknown. A payload whose shape differs from the expected one fails
    /// the whole request with [`RequestError::UnexpectedResponse`].
    pub fn resolve(&mut self, response: DataResponse) -> Resolution {
        let correlation_id = response.correlation_id;
        let Some(client_id) = response.client_id.clone() else {
            return Resolution::Unknown;
        };
        let Some(entry) = self.pending.get_mut(&correlation_id) else {
            return Resolution::Unknown;
        };
        if !entry.awaiting.remove(&client_id) {
            return Resolution::Unknown;
        }

        let received = response.payload.shape();
        if received != entry.shape {
            if let Some(entry) = self.pending.remove(&correlation_id) {
                let expected = entry.shape;
                entry.complete(Err(RequestError::UnexpectedResponse {
                    client_id,
                    expected,
                    received,
                }));
            }
            return Resolution::Delivered;
        }

        if !entry.awaiting.is_empty() {
            if let ResponsePayload::Instruments(instruments) = response.payload {
                entry.partial.extend(instruments);
            }
            return Resolution::Partial {
                remaining: entry.awaiting.len(),
            };
        }

        let Some(mut entry) = self.pending.remove(&correlation_id) else {
            return Resolution::Unknown;
        };
        let response = if entry.broadcast {
            let mut instruments = std::mem::take(&mut entry.partial);
            if let ResponsePayload::Instruments(last) = response.payload {
                instruments.extend(last);
            }
            DataResponse::merged(correlation_id, ResponsePayload::Instruments(instruments))
        } else {
            response
        };
        entry.complete(Ok(response));
        Resolution::Delivered
    }

    /// Fail a request on behalf of a client.
    ///
    /// Returns `false` if no pending request awaits `client_id` under the
    /// token.
    pub fn fail(
        &mut self,
        correlation_id: CorrelationId,
        client_id: &ClientId,
        message: impl Into<String>,
    ) -> bool {
        if !self
            .pending
            .get(&correlation_id)
            .is_some_and(|entry| entry.awaits(client_id))
        {
            return false;
        }
        if let Some(entry) = self.pending.remove(&correlation_id) {
            entry.complete(Err(RequestError::ClientFailure {
                client_id: client_id.clone(),
                message: message.into(),
            }));
        }
        true
    }

    /// Remove a request without notifying its waiter.
    ///
    /// Used when dispatch to the client failed and the caller is told
    /// through the command result instead.
    pub fn discard(&mut self, correlation_id: &CorrelationId) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    /// Stop awaiting `client_id` on a request it was never dispatched to.
    ///
    /// Returns the number of clients still awaited, or `None` if no pending
    /// request awaits the client under the token. Once nobody is awaited the
    /// entry is removed without notifying its waiter.
    pub fn withdraw(
        &mut self,
        correlation_id: &CorrelationId,
        client_id: &ClientId,
    ) -> Option<usize> {
        let entry = self.pending.get_mut(correlation_id)?;
        if !entry.awaiting.remove(client_id) {
            return None;
        }
        let remaining = entry.awaiting.len();
        if remaining == 0 {
            self.pending.remove(correlation_id);
        }
        Some(remaining)
    }

    /// Fail every request still awaiting `client_id` with
    /// [`RequestError::AdapterDisconnected`]. Returns the number expired.
    pub fn expire_all_for(&mut self, client_id: &ClientId) -> usize {
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.awaits(client_id))
            .map(|(id, _)| *id)
            .collect();

        for correlation_id in &expired {
            if let Some(entry) = self.pending.remove(correlation_id) {
                entry.complete(Err(RequestError::AdapterDisconnected {
                    client_id: client_id.clone(),
                }));
            }
        }
        expired.len()
    }

    /// Fail every pending request with `error`. Returns the number expired.
    pub fn expire_all(&mut self, error: &RequestError) -> usize {
        let count = self.pending.len();
        for (_, entry) in self.pending.drain() {
            entry.complete(Err(error.clone()));
        }
        count
    }

    /// Whether a token is pending.
    #[must_use]
    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    /// Number of requests pending on `client_id`.
    #[must_use]
    pub fn pending_for(&self, client_id: &ClientId) -> usize {
        self.pending
            .values()
            .filter(|entry| entry.awaits(client_id))
            .count()
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
