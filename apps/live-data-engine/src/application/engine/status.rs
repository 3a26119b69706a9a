//! Shared engine and data client status.
//!
//! The dispatch loop writes these records; the engine handle and the
//! health server read them from other tasks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::identifiers::{ClientId, Venue};

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Not dispatching; may be started.
    Stopped,
    /// Dispatch loop running.
    Running,
    /// Terminal; clients released.
    Disposed,
}

impl EngineState {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Disposed => "disposed",
        }
    }
}

/// Connection state of a data client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Connected and streaming.
    Connected,
    /// Disconnect in progress.
    Disconnecting,
    /// Released; no further use.
    Disposed,
}

impl ConnectionState {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disposed => "disposed",
        }
    }
}

// =============================================================================
// Client Status
// =============================================================================

/// Tracks the state of one registered data client.
#[derive(Debug)]
pub struct ClientStatus {
    client_id: ClientId,
    venue: Venue,
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    subscription_count: AtomicUsize,
    pending_requests: AtomicUsize,
    messages_received: AtomicU64,
}

impl ClientStatus {
    pub(crate) const fn new(client_id: ClientId, venue: Venue) -> Self {
        Self {
            client_id,
            venue,
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            error_message: RwLock::new(None),
            subscription_count: AtomicUsize::new(0),
            pending_requests: AtomicUsize::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
        }
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.error_message.write() = Some(message);
    }

    pub(crate) fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_subscription_count(&self, count: usize) {
        self.subscription_count.store(count, Ordering::Relaxed);
    }

    pub(crate) fn set_pending_requests(&self, count: usize) {
        self.pending_requests.store(count, Ordering::Relaxed);
    }

    /// Client identifier.
    #[must_use]
    pub const fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Venue served.
    #[must_use]
    pub const fn venue(&self) -> &Venue {
        &self.venue
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> ClientSnapshot {
        let state = self.state();
        ClientSnapshot {
            client_id: self.client_id.clone(),
            venue: self.venue.clone(),
            state,
            connected: state == ConnectionState::Connected,
            last_connected_at: *self.last_connected_at.read(),
            error_message: self.error_message.read().clone(),
            subscriptions: self.subscription_count.load(Ordering::Relaxed),
            pending_requests: self.pending_requests.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Reportable copy of a [`ClientStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    /// Client identifier.
    pub client_id: ClientId,
    /// Venue served.
    pub venue: Venue,
    /// Connection state.
    pub state: ConnectionState,
    /// Whether connected.
    pub connected: bool,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error, cleared on connect.
    pub error_message: Option<String>,
    /// Registered subscriptions.
    pub subscriptions: usize,
    /// Requests awaiting this client.
    pub pending_requests: usize,
    /// Streaming events received, dropped ones included.
    pub messages_received: u64,
}

// =============================================================================
// Counters
// =============================================================================

/// Engine message counters, shared between the loop and the handle.
#[derive(Debug, Default)]
pub struct EngineCounters {
    commands: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    data: AtomicU64,
    unknown_responses: AtomicU64,
    dropped_data: AtomicU64,
}

impl EngineCounters {
    pub(crate) fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_data(&self) {
        self.data.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_response(&self) {
        self.unknown_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_data(&self) {
        self.dropped_data.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero the command, request, response and data counts.
    pub(crate) fn reset(&self) {
        self.commands.store(0, Ordering::Relaxed);
        self.requests.store(0, Ordering::Relaxed);
        self.responses.store(0, Ordering::Relaxed);
        self.data.store(0, Ordering::Relaxed);
    }

    /// Commands processed.
    #[must_use]
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Requests dispatched.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses delivered to callers.
    #[must_use]
    pub fn response_count(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Streaming events received, dropped ones included.
    #[must_use]
    pub fn data_count(&self) -> u64 {
        self.data.load(Ordering::Relaxed)
    }

    /// Responses that matched no pending request.
    #[must_use]
    pub fn unknown_response_count(&self) -> u64 {
        self.unknown_responses.load(Ordering::Relaxed)
    }

    /// Streaming events dropped for lack of a subscription or while stopped.
    #[must_use]
    pub fn dropped_data_count(&self) -> u64 {
        self.dropped_data.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Engine Status
// =============================================================================

/// Point-in-time engine status for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Lifecycle state.
    pub state: EngineState,
    /// Per-client status.
    pub clients: Vec<ClientSnapshot>,
    /// Commands processed.
    pub command_count: u64,
    /// Requests dispatched.
    pub request_count: u64,
    /// Responses delivered.
    pub response_count: u64,
    /// Streaming events received, dropped ones included.
    pub data_count: u64,
    /// Unmatched responses.
    pub unknown_response_count: u64,
    /// Streaming events dropped for lack of a subscription or while stopped.
    pub dropped_data_count: u64,
}

impl EngineStatus {
    /// Number of connected clients.
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.clients.iter().filter(|client| client.connected).count()
    }

    /// Whether every registered client is connected.
    #[must_use]
    pub fn all_connected(&self) -> bool {
        !self.clients.is_empty() && self.clients.iter().all(|client| client.connected)
    }
}
