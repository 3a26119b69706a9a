//! Request Correlation Integration Tests
//!
//! Tests request routing, response correlation, aggregation and expiry
//! through the engine and simulated data clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready};

use live_data_engine::{
    AggressorSide, Bar, BarType, ClientId, CorrelationId, DataClient, DataClientError,
    DataResponse, EngineError, Instrument, InstrumentId, LiveDataEngine, PendingResponse,
    RequestError, ResponsePayload, ResponseShape, SimulatedDataClient, TradeTick, Venue,
};

const WAIT: Duration = Duration::from_secs(2);

fn sim(engine: &LiveDataEngine, venue: &str) -> Arc<SimulatedDataClient> {
    let client = Arc::new(SimulatedDataClient::new(
        ClientId::new(venue).unwrap(),
        Venue::new(venue).unwrap(),
        engine.data_sink(),
    ));
    engine.register_client(client.clone()).unwrap();
    client
}

fn instrument(id: &str) -> Instrument {
    Instrument::new(id.parse().unwrap(), 5, 0)
}

async fn running(venues: &[&str]) -> (LiveDataEngine, Vec<Arc<SimulatedDataClient>>) {
    let engine = LiveDataEngine::default();
    let clients = venues.iter().map(|venue| sim(&engine, venue)).collect();
    engine.start().unwrap();
    engine.connect().await.unwrap();
    (engine, clients)
}

/// Every message queued before this call has been processed once it
/// returns.
async fn barrier(engine: &LiveDataEngine) {
    engine.connect().await.unwrap();
}

async fn outcome(pending: PendingResponse) -> Result<DataResponse, RequestError> {
    timeout(WAIT, pending).await.expect("response timed out")
}

#[tokio::test]
async fn request_instrument_round_trip() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].add_instrument(instrument("AUD/USD.SIM"));
    let instrument_id: InstrumentId = "AUD/USD.SIM".parse().unwrap();
    let correlation_id = CorrelationId::new();

    let pending = engine
        .request_instrument(&instrument_id, correlation_id)
        .await
        .unwrap();
    let response = outcome(pending).await.unwrap();

    assert_eq!(response.correlation_id, correlation_id);
    assert_eq!(response.client_id, Some(ClientId::new("SIM").unwrap()));
    assert!(matches!(
        response.payload,
        ResponsePayload::Instrument(ref instrument) if instrument.id == instrument_id
    ));

    barrier(&engine).await;
    assert_eq!(engine.response_count(), 1);
    assert_eq!(engine.request_count(), 1);
    engine.dispose();
}

#[tokio::test]
async fn request_instrument_from_delayed_client() {
    let engine = LiveDataEngine::default();
    let client = Arc::new(
        SimulatedDataClient::new(
            ClientId::new("SIM").unwrap(),
            Venue::new("SIM").unwrap(),
            engine.data_sink(),
        )
        .with_latency(Duration::from_millis(20)),
    );
    client.add_instrument(instrument("EUR/USD.SIM"));
    engine.register_client(client).unwrap();
    engine.start().unwrap();
    engine.connect().await.unwrap();

    let pending = engine
        .request_instrument(&"EUR/USD.SIM".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap();
    assert!(outcome(pending).await.is_ok());
    engine.dispose();
}

#[tokio::test]
async fn unknown_instrument_fails_request() {
    let (engine, _clients) = running(&["SIM"]).await;

    let pending = engine
        .request_instrument(&"GBP/USD.SIM".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap();
    let err = outcome(pending).await.unwrap_err();

    assert!(matches!(
        err,
        RequestError::ClientFailure { ref message, .. } if message.contains("not found")
    ));
    barrier(&engine).await;
    assert_eq!(engine.response_count(), 1);
    engine.dispose();
}

#[tokio::test]
async fn request_instruments_aggregates_every_client() {
    let (engine, clients) = running(&["SIM", "BINANCE"]).await;
    clients[0].add_instrument(instrument("AUD/USD.SIM"));
    clients[0].add_instrument(instrument("EUR/USD.SIM"));
    clients[1].add_instrument(instrument("BTCUSDT.BINANCE"));

    let correlation_id = CorrelationId::new();
    let pending = engine.request_instruments(correlation_id).await.unwrap();
    let response = outcome(pending).await.unwrap();

    assert_eq!(response.correlation_id, correlation_id);
    assert_eq!(response.client_id, None);
    let ResponsePayload::Instruments(instruments) = response.payload else {
        panic!("expected instruments payload");
    };
    let mut ids: Vec<String> = instruments.iter().map(|i| i.id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, ["AUD/USD.SIM", "BTCUSDT.BINANCE", "EUR/USD.SIM"]);

    barrier(&engine).await;
    assert_eq!(engine.response_count(), 1);
    assert_eq!(clients[0].calls().requests, 1);
    assert_eq!(clients[1].calls().requests, 1);
    engine.dispose();
}

#[tokio::test]
async fn request_instruments_skips_disconnected_clients() {
    let (engine, clients) = running(&["SIM", "BINANCE"]).await;
    clients[0].add_instrument(instrument("AUD/USD.SIM"));
    clients[1].add_instrument(instrument("BTCUSDT.BINANCE"));
    clients[1].simulate_connection_loss("socket closed");

    let pending = engine.request_instruments(CorrelationId::new()).await.unwrap();
    let ResponsePayload::Instruments(instruments) = outcome(pending).await.unwrap().payload else {
        panic!("expected instruments payload");
    };
    assert_eq!(instruments.len(), 1);
    assert_eq!(instruments[0].id.to_string(), "AUD/USD.SIM");
    engine.dispose();
}

#[tokio::test]
async fn request_instruments_survives_a_failed_dispatch() {
    let (engine, clients) = running(&["SIM", "BINANCE"]).await;
    clients[0].add_instrument(instrument("AUD/USD.SIM"));
    clients[1].add_instrument(instrument("BTCUSDT.BINANCE"));
    clients[1].dispose();

    let pending = engine.request_instruments(CorrelationId::new()).await.unwrap();
    let ResponsePayload::Instruments(instruments) = outcome(pending).await.unwrap().payload else {
        panic!("expected instruments payload");
    };
    assert_eq!(instruments, vec![instrument("AUD/USD.SIM")]);

    barrier(&engine).await;
    let status = engine.status();
    assert_eq!(status.unknown_response_count, 0);
    assert_eq!(status.response_count, 1);
    assert!(status.clients.iter().all(|client| client.pending_requests == 0));
    engine.dispose();
}

#[tokio::test]
async fn request_instruments_fails_when_every_dispatch_fails() {
    let (engine, clients) = running(&["SIM", "BINANCE"]).await;
    for client in &clients {
        client.dispose();
    }

    let err = engine
        .request_instruments(CorrelationId::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Client {
            source: DataClientError::Disposed { .. },
            ..
        }
    ));
    barrier(&engine).await;
    assert_eq!(engine.status().unknown_response_count, 0);
    engine.dispose();
}

#[tokio::test]
async fn request_to_disconnected_client_is_rejected() {
    let engine = LiveDataEngine::default();
    let client = sim(&engine, "SIM");
    engine.start().unwrap();
    client.hold_responses(true);

    let err = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap_err();

    let sim_id = ClientId::new("SIM").unwrap();
    assert_eq!(
        err,
        EngineError::Client {
            client_id: sim_id.clone(),
            source: DataClientError::NotConnected { client_id: sim_id },
        }
    );
    assert_eq!(engine.request_count(), 0);
    assert_eq!(client.calls().requests, 0);
    assert_eq!(engine.status().clients[0].pending_requests, 0);
    engine.dispose();
}

#[tokio::test]
async fn request_instruments_without_connected_clients_is_rejected() {
    let engine = LiveDataEngine::default();
    let _client = sim(&engine, "SIM");
    engine.start().unwrap();

    let err = engine
        .request_instruments(CorrelationId::new())
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NoConnectedClients);
    engine.dispose();
}

#[tokio::test]
async fn unknown_venue_is_rejected() {
    let (engine, _clients) = running(&["SIM"]).await;

    let err = engine
        .request_instrument(&"BTCUSDT.BINANCE".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::NoClientForVenue(Venue::new("BINANCE").unwrap())
    );
    assert_eq!(engine.request_count(), 0);
    engine.dispose();
}

#[tokio::test]
async fn disconnect_expires_pending_requests() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);

    let pending = engine
        .request_trades(&"AUD/USD.SIM".parse().unwrap(), None, None, 0, CorrelationId::new())
        .await
        .unwrap();
    engine.disconnect().await.unwrap();

    let err = outcome(pending).await.unwrap_err();
    assert_eq!(
        err,
        RequestError::AdapterDisconnected {
            client_id: ClientId::new("SIM").unwrap()
        }
    );
    assert_eq!(
        err.to_string(),
        "connection lost: data client SIM disconnected before responding"
    );
    assert_eq!(clients[0].calls().disconnects, 1);
    engine.dispose();
}

#[tokio::test]
async fn connection_loss_expires_only_that_clients_requests() {
    let (engine, clients) = running(&["SIM", "BINANCE"]).await;
    clients[0].hold_responses(true);
    clients[1].hold_responses(true);

    let sim_pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap();
    let mut binance_pending = engine
        .request_instrument(&"BTCUSDT.BINANCE".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap();

    clients[0].simulate_connection_loss("heartbeat timeout");
    assert!(matches!(
        outcome(sim_pending).await,
        Err(RequestError::AdapterDisconnected { .. })
    ));
    assert!(binance_pending.try_recv().is_none());

    let status = engine.status();
    assert_eq!(status.connected_clients(), 1);
    assert_eq!(
        status.clients[0].error_message.as_deref(),
        Some("heartbeat timeout")
    );
    engine.dispose();
}

#[tokio::test]
async fn late_response_after_expiry_is_unknown() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);
    let correlation_id = CorrelationId::new();

    let pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), correlation_id)
        .await
        .unwrap();
    engine.disconnect().await.unwrap();
    assert!(outcome(pending).await.is_err());

    engine.data_sink().send_response(DataResponse::new(
        correlation_id,
        ClientId::new("SIM").unwrap(),
        ResponsePayload::Instrument(instrument("AUD/USD.SIM")),
    ));
    barrier(&engine).await;

    let status = engine.status();
    assert_eq!(status.unknown_response_count, 1);
    assert_eq!(status.response_count, 0);
    engine.dispose();
}

#[tokio::test]
async fn duplicate_correlation_is_rejected() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);
    let correlation_id = CorrelationId::new();
    let instrument_id: InstrumentId = "AUD/USD.SIM".parse().unwrap();

    let mut first = engine
        .request_instrument(&instrument_id, correlation_id)
        .await
        .unwrap();
    let err = engine
        .request_instrument(&instrument_id, correlation_id)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::DuplicateCorrelation(_)));
    assert!(first.try_recv().is_none());
    assert_eq!(engine.request_count(), 1);
    engine.dispose();
}

#[tokio::test]
async fn wrong_payload_shape_fails_request() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);
    let correlation_id = CorrelationId::new();

    let pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), correlation_id)
        .await
        .unwrap();
    engine.data_sink().send_response(DataResponse::new(
        correlation_id,
        ClientId::new("SIM").unwrap(),
        ResponsePayload::Trades(vec![]),
    ));

    assert_eq!(
        outcome(pending).await.unwrap_err(),
        RequestError::UnexpectedResponse {
            client_id: ClientId::new("SIM").unwrap(),
            expected: ResponseShape::Instrument,
            received: ResponseShape::Trades,
        }
    );
    engine.dispose();
}

#[tokio::test]
async fn dispose_fails_pending_requests() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);

    let pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), CorrelationId::new())
        .await
        .unwrap();
    engine.dispose();

    assert_eq!(
        outcome(pending).await.unwrap_err(),
        RequestError::EngineDisposed
    );
    engine.join().await.unwrap();
}

#[tokio::test]
async fn pending_request_resolves_while_stopped() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);
    let correlation_id = CorrelationId::new();

    let mut pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), correlation_id)
        .await
        .unwrap();
    engine.stop();
    engine.join().await.unwrap();

    engine.data_sink().send_response(DataResponse::new(
        correlation_id,
        ClientId::new("SIM").unwrap(),
        ResponsePayload::Instrument(instrument("AUD/USD.SIM")),
    ));

    let response = pending.try_recv().expect("resolved while stopped").unwrap();
    assert_eq!(response.correlation_id, correlation_id);
    assert_eq!(engine.response_count(), 1);
    assert_eq!(engine.status().clients[0].pending_requests, 0);

    engine.start().unwrap();
    barrier(&engine).await;
    assert_eq!(engine.status().unknown_response_count, 0);
    engine.dispose();
}

#[tokio::test]
async fn connection_loss_while_stopped_expires_requests() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);

    let pending = engine
        .request_trades(&"AUD/USD.SIM".parse().unwrap(), None, None, 0, CorrelationId::new())
        .await
        .unwrap();
    engine.stop();
    engine.join().await.unwrap();

    clients[0].simulate_connection_loss("socket closed");

    assert_eq!(
        outcome(pending).await.unwrap_err(),
        RequestError::AdapterDisconnected {
            client_id: ClientId::new("SIM").unwrap()
        }
    );
    let status = engine.status();
    assert_eq!(status.connected_clients(), 0);
    assert_eq!(status.clients[0].error_message.as_deref(), Some("socket closed"));
    engine.dispose();
}

#[tokio::test]
async fn pending_response_wakes_when_resolved() {
    let (engine, clients) = running(&["SIM"]).await;
    clients[0].hold_responses(true);
    let correlation_id = CorrelationId::new();

    let pending = engine
        .request_instrument(&"AUD/USD.SIM".parse().unwrap(), correlation_id)
        .await
        .unwrap();
    let mut task = tokio_test::task::spawn(pending);
    assert_pending!(task.poll());

    engine.data_sink().send_response(DataResponse::new(
        correlation_id,
        ClientId::new("SIM").unwrap(),
        ResponsePayload::Instrument(instrument("AUD/USD.SIM")),
    ));
    barrier(&engine).await;

    assert!(task.is_woken());
    let response = assert_ready!(task.poll()).unwrap();
    assert_eq!(response.correlation_id, correlation_id);
    engine.dispose();
}

#[tokio::test]
async fn historical_trades_and_bars_are_routed() {
    let (engine, clients) = running(&["SIM"]).await;
    let instrument_id: InstrumentId = "AUD/USD.SIM".parse().unwrap();
    let bar_type: BarType = "AUD/USD.SIM-1-MINUTE-BID".parse().unwrap();

    clients[0].add_trades((0..5).map(|minute| TradeTick {
        instrument_id: instrument_id.clone(),
        price: Decimal::new(65_000 + i64::from(minute), 5),
        size: Decimal::ONE,
        aggressor_side: AggressorSide::Buyer,
        trade_id: format!("T{minute}"),
        ts_event: Utc.with_ymd_and_hms(2024, 3, 1, 0, minute, 0).unwrap(),
    }));
    clients[0].add_bars((0..3).map(|minute| Bar {
        bar_type: bar_type.clone(),
        open: Decimal::ONE,
        high: Decimal::TWO,
        low: Decimal::ONE,
        close: Decimal::TWO,
        volume: Decimal::TEN,
        ts_event: Utc.with_ymd_and_hms(2024, 3, 1, 0, minute, 0).unwrap(),
    }));

    let trades = engine
        .request_trades(&instrument_id, None, None, 2, CorrelationId::new())
        .await
        .unwrap();
    let ResponsePayload::Trades(trades) = outcome(trades).await.unwrap().payload else {
        panic!("expected trades payload");
    };
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[1].trade_id, "T4");

    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 1, 0).unwrap();
    let bars = engine
        .request_bars(&bar_type, Some(start), None, 0, CorrelationId::new())
        .await
        .unwrap();
    let ResponsePayload::Bars(bars) = outcome(bars).await.unwrap().payload else {
        panic!("expected bars payload");
    };
    assert_eq!(bars.len(), 2);

    barrier(&engine).await;
    assert_eq!(engine.request_count(), 2);
    assert_eq!(engine.response_count(), 2);
    engine.dispose();
}
