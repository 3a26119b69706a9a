//! Dispatch loop state.
//!
//! `EngineCore` owns the registered data clients, their subscription
//! registries and the correlation table. Only the dispatch loop touches
//! it, so none of these carry locks. Between runs the core is parked in a
//! shared slot together with the inbound receiver, and data sinks hand
//! their messages to it directly under the slot lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::messages::{Ack, DataRequest, EngineCommand, EngineMessage};
use super::status::{ClientStatus, ConnectionState, EngineCounters};
use super::EngineError;
use crate::application::ports::{DataClient, DataClientError};
use crate::domain::correlation::{
    CorrelationTable, PendingRequest, RequestError, Resolution, ResponseWaiter,
};
use crate::domain::data::{Data, DataResponse};
use crate::domain::identifiers::{ClientId, CorrelationId, Venue};
use crate::domain::subscription::{DataCategory, Subscription, SubscriptionKey, SubscriptionRegistry};
use crate::infrastructure::broadcast::SharedDataHub;
use crate::infrastructure::metrics::{self, FailureReason};

/// A stopped core waiting for the next `start`.
pub(crate) struct ParkedCore {
    pub(crate) core: EngineCore,
    pub(crate) inbound: mpsc::UnboundedReceiver<EngineMessage>,
}

impl ParkedCore {
    /// Handle a message from a data client while the loop is parked.
    pub(crate) fn absorb(&mut self, message: EngineMessage) {
        self.drain();
        self.core.handle_parked(message);
    }

    /// Handle what reached the queue after the loop stopped draining it.
    pub(crate) fn drain(&mut self) {
        while let Ok(message) = self.inbound.try_recv() {
            self.core.handle_parked(message);
        }
    }
}

/// Slot the core is parked in while the loop is not running.
pub(crate) type CoreSlot = Arc<Mutex<Option<ParkedCore>>>;

struct ClientEntry {
    client: Arc<dyn DataClient>,
    status: Arc<ClientStatus>,
    subscriptions: SubscriptionRegistry,
}

pub(crate) struct EngineCore {
    clients: Vec<ClientEntry>,
    index: HashMap<ClientId, usize>,
    venues: HashMap<Venue, usize>,
    correlations: CorrelationTable,
    hub: SharedDataHub,
    counters: Arc<EngineCounters>,
    disposed: bool,
    // Last values this engine added to the process-wide gauges.
    published_pending: usize,
    published_connected: usize,
}

impl EngineCore {
    pub(crate) fn new(hub: SharedDataHub, counters: Arc<EngineCounters>) -> Self {
        Self {
            clients: Vec::new(),
            index: HashMap::new(),
            venues: HashMap::new(),
            correlations: CorrelationTable::new(),
            hub,
            counters,
            disposed: false,
            published_pending: 0,
            published_connected: 0,
        }
    }

    pub(crate) const fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn register(
        &mut self,
        client: Arc<dyn DataClient>,
    ) -> Result<Arc<ClientStatus>, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        let client_id = client.client_id().clone();
        let venue = client.venue().clone();
        if self.index.contains_key(&client_id) || self.venues.contains_key(&venue) {
            return Err(EngineError::DuplicateClient { client_id, venue });
        }

        let status = Arc::new(ClientStatus::new(client_id.clone(), venue.clone()));
        if client.is_connected() {
            status.set_state(ConnectionState::Connected);
        }
        let position = self.clients.len();
        self.clients.push(ClientEntry {
            client,
            status: Arc::clone(&status),
            subscriptions: SubscriptionRegistry::new(),
        });
        self.index.insert(client_id.clone(), position);
        self.venues.insert(venue.clone(), position);

        tracing::info!(client_id = %client_id, venue = %venue, "Registered data client");
        Ok(status)
    }

    // =========================================================================
    // Dispatch Loop
    // =========================================================================

    /// Consume the inbound queue until cancelled, drain what is left, then
    /// park back into `slot`.
    ///
    /// Disposal of a running engine happens here, outside the slot lock, so
    /// clients are never released while a data sink may be waiting on it.
    pub(crate) async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<EngineMessage>,
        shutdown: CancellationToken,
        slot: CoreSlot,
        dispose_requested: Arc<AtomicBool>,
    ) {
        tracing::info!(clients = self.clients.len(), "Engine dispatch loop started");
        metrics::set_running(true);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
            }
        }

        if dispose_requested.load(Ordering::SeqCst) {
            self.dispose();
        }
        let mut drained = 0usize;
        while let Ok(message) = inbound.try_recv() {
            self.handle(message).await;
            drained += 1;
        }

        metrics::set_running(false);
        tracing::info!(
            drained,
            pending = self.correlations.len(),
            "Engine dispatch loop stopped"
        );

        loop {
            if dispose_requested.load(Ordering::SeqCst) {
                self.dispose();
            }
            let mut parked = slot.lock();
            // Disposal requested after the check above; release the lock first.
            if dispose_requested.load(Ordering::SeqCst) && !self.is_disposed() {
                continue;
            }
            let mut core = ParkedCore {
                core: self,
                inbound,
            };
            core.drain();
            *parked = Some(core);
            break;
        }
    }

    async fn handle(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Command(command) => self.handle_command(command).await,
            other => self.handle_event(other),
        }
    }

    /// Handle a message that arrived while the loop is not running.
    ///
    /// Request outcomes and connection loss are applied as usual. Streaming
    /// events are counted and dropped.
    fn handle_parked(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Data { client_id, data } => {
                self.counters.record_data();
                self.drop_data(data.kind(), &client_id, "engine stopped");
            }
            other => self.handle_event(other),
        }
    }

    fn handle_event(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::Command(command) => {
                reply(command.into_ack(), Err(EngineError::NotRunning));
            }
            EngineMessage::Response(response) => self.handle_response(response),
            EngineMessage::Failure {
                correlation_id,
                client_id,
                message,
            } => self.handle_failure(correlation_id, &client_id, message),
            EngineMessage::Data { client_id, data } => self.handle_data(&client_id, data),
            EngineMessage::ConnectionLost { client_id, reason } => {
                self.handle_connection_lost(&client_id, &reason);
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: EngineCommand) {
        self.counters.record_command();
        metrics::record_command(command.kind());

        if self.disposed {
            reply(command.into_ack(), Err(EngineError::Disposed));
            return;
        }

        match command {
            EngineCommand::Connect(ack) => {
                let result = self.connect_all().await;
                reply(ack, result);
            }
            EngineCommand::Disconnect(ack) => {
                self.disconnect_all().await;
                reply(ack, Ok(()));
            }
            EngineCommand::Reset(ack) => {
                self.reset();
                reply(ack, Ok(()));
            }
            EngineCommand::Subscribe { subscription, ack } => {
                let result = self.subscribe(subscription).await;
                reply(ack, result);
            }
            EngineCommand::Unsubscribe { subscription, ack } => {
                let result = self.unsubscribe(&subscription).await;
                reply(ack, result);
            }
            EngineCommand::Request {
                request,
                waiter,
                ack,
            } => {
                let result = self.request(request, waiter).await;
                reply(ack, result);
            }
        }
    }

    async fn connect_all(&mut self) -> Result<(), EngineError> {
        let mut first_error = None;

        for position in 0..self.clients.len() {
            let entry = &self.clients[position];
            if entry.status.is_connected() {
                continue;
            }
            let client = Arc::clone(&entry.client);
            let status = Arc::clone(&entry.status);

            tracing::info!(
                client_id = %client.client_id(),
                venue = %client.venue(),
                "Connecting data client"
            );
            status.set_state(ConnectionState::Connecting);

            match client.connect().await {
                Ok(()) => {
                    status.set_state(ConnectionState::Connected);
                    tracing::info!(client_id = %client.client_id(), "Data client connected");
                    self.replay_subscriptions(position).await;
                }
                Err(e) => {
                    status.set_state(ConnectionState::Disconnected);
                    status.set_error(e.to_string());
                    tracing::error!(
                        client_id = %client.client_id(),
                        error = %e,
                        "Data client failed to connect"
                    );
                    if first_error.is_none() {
                        first_error = Some(EngineError::client(client.client_id().clone(), e));
                    }
                }
            }
        }

        self.publish_connected_gauge();
        first_error.map_or(Ok(()), Err)
    }

    async fn replay_subscriptions(&self, position: usize) {
        let entry = &self.clients[position];
        let subscriptions: Vec<Subscription> = entry.subscriptions.iter().cloned().collect();
        if subscriptions.is_empty() {
            return;
        }

        tracing::info!(
            client_id = %entry.client.client_id(),
            count = subscriptions.len(),
            "Replaying subscriptions"
        );
        for subscription in &subscriptions {
            if let Err(e) = forward(entry.client.as_ref(), subscription, true).await {
                tracing::warn!(
                    client_id = %entry.client.client_id(),
                    subscription = %subscription,
                    error = %e,
                    "Failed to replay subscription"
                );
            }
        }
    }

    async fn disconnect_all(&mut self) {
        for position in 0..self.clients.len() {
            let entry = &self.clients[position];
            let client = Arc::clone(&entry.client);
            let status = Arc::clone(&entry.status);

            if status.is_connected() {
                tracing::info!(client_id = %client.client_id(), "Disconnecting data client");
                status.set_state(ConnectionState::Disconnecting);
                if let Err(e) = client.disconnect().await {
                    tracing::warn!(
                        client_id = %client.client_id(),
                        error = %e,
                        "Data client disconnect reported an error"
                    );
                }
                status.set_state(ConnectionState::Disconnected);
            }
            self.expire_pending_for(client.client_id());
        }
        self.publish_connected_gauge();
    }

    pub(crate) fn reset(&self) {
        for entry in &self.clients {
            entry.client.reset();
        }
        self.counters.reset();
        tracing::info!(clients = self.clients.len(), "Engine reset");
    }

    async fn subscribe(&mut self, subscription: Subscription) -> Result<(), EngineError> {
        let position = self.route(subscription.venue())?;
        let entry = &mut self.clients[position];

        if !entry.subscriptions.add(subscription.clone()) {
            tracing::debug!(subscription = %subscription, "Already subscribed");
            return Ok(());
        }

        if entry.status.is_connected() {
            if let Err(e) = forward(entry.client.as_ref(), &subscription, true).await {
                entry.subscriptions.remove(&subscription);
                return Err(EngineError::client(entry.client.client_id().clone(), e));
            }
        } else {
            tracing::debug!(
                subscription = %subscription,
                "Data client not connected, subscription deferred until connect"
            );
        }

        entry
            .status
            .set_subscription_count(entry.subscriptions.len());
        tracing::info!(subscription = %subscription, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&mut self, subscription: &Subscription) -> Result<(), EngineError> {
        let position = self.route(subscription.venue())?;
        let entry = &mut self.clients[position];

        if !entry.subscriptions.remove(subscription) {
            tracing::debug!(subscription = %subscription, "Not subscribed");
            return Ok(());
        }
        entry
            .status
            .set_subscription_count(entry.subscriptions.len());

        if entry.status.is_connected() {
            forward(entry.client.as_ref(), subscription, false)
                .await
                .map_err(|e| EngineError::client(entry.client.client_id().clone(), e))?;
        }
        tracing::info!(subscription = %subscription, "Unsubscribed");
        Ok(())
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn request(
        &mut self,
        request: DataRequest,
        waiter: ResponseWaiter,
    ) -> Result<(), EngineError> {
        let correlation_id = request.correlation_id();
        let shape = request.shape();

        let Some(venue) = request.venue() else {
            return self.request_instruments(correlation_id, waiter).await;
        };
        let position = self.route(venue)?;
        let client = Arc::clone(&self.clients[position].client);
        if !self.clients[position].status.is_connected() {
            let client_id = client.client_id().clone();
            tracing::debug!(
                correlation_id = %correlation_id,
                client_id = %client_id,
                "Request rejected, data client not connected"
            );
            return Err(EngineError::client(
                client_id.clone(),
                DataClientError::NotConnected { client_id },
            ));
        }

        self.correlations.register(PendingRequest::new(
            correlation_id,
            shape,
            client.client_id().clone(),
            waiter,
        ))?;
        self.counters.record_request();
        metrics::record_request(shape.as_str());
        tracing::debug!(
            correlation_id = %correlation_id,
            client_id = %client.client_id(),
            shape = %shape,
            "Dispatching request"
        );

        let dispatched = match &request {
            DataRequest::Instrument { instrument_id, .. } => {
                client.request_instrument(instrument_id, correlation_id).await
            }
            DataRequest::Trades {
                instrument_id,
                start,
                end,
                limit,
                ..
            } => {
                client
                    .request_trades(instrument_id, *start, *end, *limit, correlation_id)
                    .await
            }
            DataRequest::Bars {
                bar_type,
                start,
                end,
                limit,
                ..
            } => {
                client
                    .request_bars(bar_type, *start, *end, *limit, correlation_id)
                    .await
            }
            DataRequest::Instruments { .. } => Ok(()),
        };

        self.refresh_pending(client.client_id());
        dispatched.map_err(|e| self.dispatch_failed(correlation_id, client.client_id(), e))
    }

    async fn request_instruments(
        &mut self,
        correlation_id: CorrelationId,
        waiter: ResponseWaiter,
    ) -> Result<(), EngineError> {
        let targets: Vec<Arc<dyn DataClient>> = self
            .clients
            .iter()
            .filter(|entry| entry.status.is_connected())
            .map(|entry| Arc::clone(&entry.client))
            .collect();
        if targets.is_empty() {
            return Err(EngineError::NoConnectedClients);
        }

        self.correlations.register(PendingRequest::broadcast(
            correlation_id,
            targets.iter().map(|client| client.client_id().clone()),
            waiter,
        ))?;
        self.counters.record_request();
        metrics::record_request("instruments");
        tracing::debug!(
            correlation_id = %correlation_id,
            clients = targets.len(),
            "Broadcasting instruments request"
        );

        let results = join_all(
            targets
                .iter()
                .map(|client| client.request_instruments(correlation_id)),
        )
        .await;

        let mut first_error = None;
        for (client, result) in targets.iter().zip(results) {
            let client_id = client.client_id();
            if let Err(e) = result {
                let remaining = self.correlations.withdraw(&correlation_id, client_id);
                tracing::warn!(
                    correlation_id = %correlation_id,
                    client_id = %client_id,
                    remaining = ?remaining,
                    error = %e,
                    "Instruments request not dispatched to data client"
                );
                if first_error.is_none() {
                    first_error = Some(EngineError::client(client_id.clone(), e));
                }
            }
            self.refresh_pending(client_id);
        }

        match first_error {
            // Remaining clients still answer into the merged response.
            Some(_) if self.correlations.contains(&correlation_id) => Ok(()),
            Some(error) => {
                metrics::record_request_failures(FailureReason::DispatchFailed, 1);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn dispatch_failed(
        &mut self,
        correlation_id: CorrelationId,
        client_id: &ClientId,
        error: DataClientError,
    ) -> EngineError {
        if self.correlations.discard(&correlation_id) {
            metrics::record_request_failures(FailureReason::DispatchFailed, 1);
        }
        self.refresh_pending(client_id);
        tracing::warn!(
            correlation_id = %correlation_id,
            client_id = %client_id,
            error = %error,
            "Request dispatch failed"
        );
        EngineError::client(client_id.clone(), error)
    }

    // =========================================================================
    // Inbound Messages
    // =========================================================================

    fn handle_response(&mut self, response: DataResponse) {
        let correlation_id = response.correlation_id;
        let client_id = response.client_id.clone();
        let shape = response.payload.shape();

        match self.correlations.resolve(response) {
            Resolution::Delivered => {
                self.counters.record_response();
                metrics::record_response(shape.as_str());
                tracing::debug!(correlation_id = %correlation_id, "Response delivered");
            }
            Resolution::Partial { remaining } => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    remaining,
                    "Partial response recorded"
                );
            }
            Resolution::Unknown => {
                self.counters.record_unknown_response();
                metrics::record_unknown_response();
                tracing::warn!(
                    correlation_id = %correlation_id,
                    client_id = ?client_id,
                    "Response for unknown correlation id"
                );
            }
        }

        if let Some(client_id) = &client_id {
            self.refresh_pending(client_id);
        }
    }

    fn handle_failure(
        &mut self,
        correlation_id: CorrelationId,
        client_id: &ClientId,
        message: String,
    ) {
        if self.correlations.fail(correlation_id, client_id, message) {
            self.counters.record_response();
            metrics::record_request_failures(FailureReason::ClientFailure, 1);
            tracing::debug!(
                correlation_id = %correlation_id,
                client_id = %client_id,
                "Request failed by data client"
            );
        } else {
            self.counters.record_unknown_response();
            metrics::record_unknown_response();
            tracing::warn!(
                correlation_id = %correlation_id,
                client_id = %client_id,
                "Failure for unknown correlation id"
            );
        }
        self.refresh_pending(client_id);
    }

    fn handle_data(&mut self, client_id: &ClientId, data: Data) {
        self.counters.record_data();
        let kind = data.kind();

        let Some(&position) = self.index.get(client_id) else {
            self.drop_data(kind, client_id, "unregistered client");
            return;
        };
        let entry = &self.clients[position];
        entry.status.increment_messages();

        if !entry.subscriptions.accepts(&data) {
            self.drop_data(kind, client_id, "no subscription");
            return;
        }

        let receivers = self.hub.publish(data);
        metrics::record_data_published(kind);
        tracing::trace!(client_id = %client_id, kind, receivers = ?receivers, "Published data");
    }

    fn drop_data(&self, kind: &'static str, client_id: &ClientId, reason: &str) {
        self.counters.record_dropped_data();
        metrics::record_data_dropped(kind);
        tracing::debug!(client_id = %client_id, kind, reason, "Dropped data event");
    }

    fn handle_connection_lost(&mut self, client_id: &ClientId, reason: &str) {
        let Some(&position) = self.index.get(client_id) else {
            tracing::warn!(client_id = %client_id, "Connection loss from unregistered client");
            return;
        };
        let status = &self.clients[position].status;
        if status.state() != ConnectionState::Disposed {
            status.set_state(ConnectionState::Disconnected);
            status.set_error(reason.to_string());
        }

        let expired = self.expire_pending_for(client_id);
        self.publish_connected_gauge();
        tracing::warn!(
            client_id = %client_id,
            reason,
            expired,
            "Data client connection lost"
        );
    }

    // =========================================================================
    // Disposal
    // =========================================================================

    /// Release every data client exactly once and fail what is pending.
    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        for entry in &mut self.clients {
            entry.client.dispose();
            entry.status.set_state(ConnectionState::Disposed);
            entry.subscriptions.clear();
            entry.status.set_subscription_count(0);
            entry.status.set_pending_requests(0);
        }

        let expired = self.correlations.expire_all(&RequestError::EngineDisposed);
        if expired > 0 {
            metrics::record_request_failures(FailureReason::Disposed, expired as u64);
        }
        self.refresh_pending_gauge();
        self.publish_connected_gauge();
        tracing::info!(
            clients = self.clients.len(),
            expired,
            "Engine disposed"
        );
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn route(&self, venue: &Venue) -> Result<usize, EngineError> {
        self.venues
            .get(venue)
            .copied()
            .ok_or_else(|| EngineError::NoClientForVenue(venue.clone()))
    }

    fn expire_pending_for(&mut self, client_id: &ClientId) -> usize {
        let expired = self.correlations.expire_all_for(client_id);
        if expired > 0 {
            metrics::record_request_failures(FailureReason::Disconnected, expired as u64);
        }
        self.refresh_pending(client_id);
        expired
    }

    fn refresh_pending(&mut self, client_id: &ClientId) {
        if let Some(&position) = self.index.get(client_id) {
            self.clients[position]
                .status
                .set_pending_requests(self.correlations.pending_for(client_id));
        }
        self.refresh_pending_gauge();
    }

    fn refresh_pending_gauge(&mut self) {
        let pending = self.correlations.len();
        metrics::shift_pending_requests(self.published_pending, pending);
        self.published_pending = pending;
    }

    fn publish_connected_gauge(&mut self) {
        let connected = self
            .clients
            .iter()
            .filter(|entry| entry.status.is_connected())
            .count();
        metrics::shift_connected_clients(self.published_connected, connected);
        self.published_connected = connected;
    }
}

fn reply(ack: Ack, result: Result<(), EngineError>) {
    if ack.send(result).is_err() {
        tracing::debug!("Command caller dropped before acknowledgement");
    }
}

async fn forward(
    client: &dyn DataClient,
    subscription: &Subscription,
    subscribe: bool,
) -> Result<(), DataClientError> {
    match (subscription.category(), subscription.key()) {
        (DataCategory::Instrument, None) => {
            if subscribe {
                client.subscribe_instruments().await
            } else {
                client.unsubscribe_instruments().await
            }
        }
        (DataCategory::Instrument, Some(SubscriptionKey::Instrument(id))) => {
            if subscribe {
                client.subscribe_instrument(id).await
            } else {
                client.unsubscribe_instrument(id).await
            }
        }
        (DataCategory::Quotes, Some(SubscriptionKey::Instrument(id))) => {
            if subscribe {
                client.subscribe_quotes(id).await
            } else {
                client.unsubscribe_quotes(id).await
            }
        }
        (DataCategory::Trades, Some(SubscriptionKey::Instrument(id))) => {
            if subscribe {
                client.subscribe_trades(id).await
            } else {
                client.unsubscribe_trades(id).await
            }
        }
        (DataCategory::Bars, Some(SubscriptionKey::Bar(bar_type))) => {
            if subscribe {
                client.subscribe_bars(bar_type).await
            } else {
                client.unsubscribe_bars(bar_type).await
            }
        }
        _ => Err(DataClientError::Request {
            message: format!("unroutable subscription {subscription}"),
        }),
    }
}
