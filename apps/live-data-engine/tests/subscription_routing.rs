//! Subscription Routing Integration Tests
//!
//! Tests subscription bookkeeping, replay on reconnect, and fan-out of
//! streaming events to hub consumers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::TryRecvError;

use live_data_engine::{
    AggressorSide, Bar, BarType, ClientId, ConnectionState, Data, DataCategory, EngineError,
    Instrument, InstrumentId, LiveDataEngine, QuoteTick, SimulatedDataClient, Subscription,
    TradeTick, Venue,
};

fn sim(engine: &LiveDataEngine, venue: &str) -> Arc<SimulatedDataClient> {
    let client = Arc::new(SimulatedDataClient::new(
        ClientId::new(venue).unwrap(),
        Venue::new(venue).unwrap(),
        engine.data_sink(),
    ));
    engine.register_client(client.clone()).unwrap();
    client
}

async fn running(venue: &str) -> (LiveDataEngine, Arc<SimulatedDataClient>) {
    let engine = LiveDataEngine::default();
    let client = sim(&engine, venue);
    engine.start().unwrap();
    engine.connect().await.unwrap();
    (engine, client)
}

/// Every message queued before this call has been processed once it
/// returns.
async fn barrier(engine: &LiveDataEngine) {
    engine.connect().await.unwrap();
}

fn id(value: &str) -> InstrumentId {
    value.parse().unwrap()
}

fn quote(instrument_id: &str) -> Data {
    Data::Quote(QuoteTick {
        instrument_id: id(instrument_id),
        bid_price: Decimal::new(65_010, 5),
        ask_price: Decimal::new(65_012, 5),
        bid_size: Decimal::new(100_000, 0),
        ask_size: Decimal::new(100_000, 0),
        ts_event: Utc::now(),
    })
}

#[tokio::test]
async fn subscribe_is_idempotent() {
    let (engine, client) = running("SIM").await;
    let instrument_id = id("AUD/USD.SIM");

    engine.subscribe_quotes(&instrument_id).await.unwrap();
    engine.subscribe_quotes(&instrument_id).await.unwrap();

    assert_eq!(client.calls().subscribes, 1);
    assert!(client.is_subscribed(&Subscription::quotes(&instrument_id)));
    assert_eq!(engine.status().clients[0].subscriptions, 1);

    engine.unsubscribe_quotes(&instrument_id).await.unwrap();
    engine.unsubscribe_quotes(&instrument_id).await.unwrap();

    assert_eq!(client.calls().unsubscribes, 1);
    assert_eq!(client.subscription_count(), 0);
    assert_eq!(engine.status().clients[0].subscriptions, 0);
    engine.dispose();
}

#[tokio::test]
async fn unsubscribe_without_subscription_is_a_no_op() {
    let (engine, client) = running("SIM").await;

    engine.unsubscribe_trades(&id("AUD/USD.SIM")).await.unwrap();

    assert_eq!(client.calls().unsubscribes, 0);
    engine.dispose();
}

#[tokio::test]
async fn each_category_is_tracked_separately() {
    let (engine, client) = running("SIM").await;
    let instrument_id = id("AUD/USD.SIM");
    let bar_type: BarType = "AUD/USD.SIM-1-MINUTE-BID".parse().unwrap();

    engine.subscribe_instrument(&instrument_id).await.unwrap();
    engine.subscribe_quotes(&instrument_id).await.unwrap();
    engine.subscribe_trades(&instrument_id).await.unwrap();
    engine.subscribe_bars(&bar_type).await.unwrap();
    engine
        .subscribe_instruments(&Venue::new("SIM").unwrap())
        .await
        .unwrap();

    assert_eq!(client.subscription_count(), 5);
    assert!(client.is_subscribed(&Subscription::bars(&bar_type)));
    assert_eq!(Subscription::bars(&bar_type).category(), DataCategory::Bars);

    engine.unsubscribe_trades(&instrument_id).await.unwrap();
    assert_eq!(client.subscription_count(), 4);
    assert!(!client.is_subscribed(&Subscription::trades(&instrument_id)));
    engine.dispose();
}

#[tokio::test]
async fn unknown_venue_is_rejected() {
    let (engine, client) = running("SIM").await;

    let err = engine
        .subscribe_quotes(&id("BTCUSDT.BINANCE"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        EngineError::NoClientForVenue(Venue::new("BINANCE").unwrap())
    );
    assert_eq!(client.calls().subscribes, 0);
    engine.dispose();
}

#[tokio::test]
async fn subscription_while_disconnected_is_forwarded_on_connect() {
    let engine = LiveDataEngine::default();
    let client = sim(&engine, "SIM");
    engine.start().unwrap();
    let subscription = Subscription::quotes(&id("EUR/USD.SIM"));

    engine.subscribe(subscription.clone()).await.unwrap();
    assert_eq!(client.calls().subscribes, 0);
    assert_eq!(engine.status().clients[0].subscriptions, 1);

    engine.connect().await.unwrap();
    assert!(client.is_subscribed(&subscription));
    assert_eq!(client.calls().subscribes, 1);
    engine.dispose();
}

#[tokio::test]
async fn reconnect_replays_subscriptions() {
    let (engine, client) = running("SIM").await;
    let quotes = Subscription::quotes(&id("AUD/USD.SIM"));
    let trades = Subscription::trades(&id("AUD/USD.SIM"));
    engine.subscribe(quotes.clone()).await.unwrap();
    engine.subscribe(trades.clone()).await.unwrap();

    client.simulate_connection_loss("socket reset");
    assert_eq!(client.subscription_count(), 0);

    engine.connect().await.unwrap();

    assert!(client.is_subscribed(&quotes));
    assert!(client.is_subscribed(&trades));
    assert_eq!(client.calls().connects, 2);
    assert_eq!(engine.status().clients[0].state, ConnectionState::Connected);
    engine.dispose();
}

#[tokio::test]
async fn failed_connect_is_reported_per_client() {
    let engine = LiveDataEngine::default();
    let sim_client = sim(&engine, "SIM");
    let binance = sim(&engine, "BINANCE");
    engine.start().unwrap();
    binance.fail_next_connect("api key rejected");

    let err = engine.connect().await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Client { ref client_id, .. } if client_id.as_str() == "BINANCE"
    ));
    assert_eq!(sim_client.calls().connects, 1);
    assert!(!engine.is_connected());

    let status = engine.status();
    assert_eq!(status.connected_clients(), 1);
    let binance_status = status
        .clients
        .iter()
        .find(|client| client.client_id.as_str() == "BINANCE")
        .unwrap();
    assert!(
        binance_status
            .error_message
            .as_deref()
            .unwrap()
            .contains("api key rejected")
    );

    engine.connect().await.unwrap();
    assert!(engine.is_connected());
    assert_eq!(sim_client.calls().connects, 1);
    engine.dispose();
}

#[tokio::test]
async fn quotes_fan_out_to_every_receiver() {
    let (engine, client) = running("SIM").await;
    let hub = engine.hub();
    let mut first = hub.quotes_rx();
    let mut second = hub.quotes_rx();
    engine.subscribe_quotes(&id("AUD/USD.SIM")).await.unwrap();

    client.publish(quote("AUD/USD.SIM"));
    client.publish(quote("EUR/USD.SIM"));
    barrier(&engine).await;

    assert_eq!(first.try_recv().unwrap().instrument_id, id("AUD/USD.SIM"));
    assert_eq!(second.try_recv().unwrap().instrument_id, id("AUD/USD.SIM"));
    assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));

    let status = engine.status();
    assert_eq!(status.data_count, 2);
    assert_eq!(status.dropped_data_count, 1);
    assert_eq!(status.clients[0].messages_received, 2);
    engine.dispose();
}

#[tokio::test]
async fn data_is_dropped_while_stopped() {
    let (engine, client) = running("SIM").await;
    let mut quotes = engine.hub().quotes_rx();
    engine.subscribe_quotes(&id("AUD/USD.SIM")).await.unwrap();
    engine.stop();
    engine.join().await.unwrap();

    client.publish(quote("AUD/USD.SIM"));

    assert!(matches!(quotes.try_recv(), Err(TryRecvError::Empty)));
    let status = engine.status();
    assert_eq!(status.data_count, 1);
    assert_eq!(status.dropped_data_count, 1);

    engine.start().unwrap();
    client.publish(quote("AUD/USD.SIM"));
    barrier(&engine).await;
    assert_eq!(quotes.try_recv().unwrap().instrument_id, id("AUD/USD.SIM"));
    engine.dispose();
}

#[tokio::test]
async fn unsubscribed_stream_is_dropped() {
    let (engine, client) = running("SIM").await;
    let mut trades = engine.hub().trades_rx();
    let instrument_id = id("AUD/USD.SIM");
    engine.subscribe_trades(&instrument_id).await.unwrap();
    engine.unsubscribe_trades(&instrument_id).await.unwrap();

    client.publish(Data::Trade(TradeTick {
        instrument_id,
        price: Decimal::new(65_011, 5),
        size: Decimal::ONE,
        aggressor_side: AggressorSide::Seller,
        trade_id: "T-1".to_string(),
        ts_event: Utc::now(),
    }));
    barrier(&engine).await;

    assert!(matches!(trades.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(engine.status().dropped_data_count, 1);
    engine.dispose();
}

#[tokio::test]
async fn venue_subscription_accepts_any_instrument_update() {
    let (engine, client) = running("SIM").await;
    let mut instruments = engine.hub().instruments_rx();
    engine
        .subscribe_instruments(&Venue::new("SIM").unwrap())
        .await
        .unwrap();

    client.publish(Data::Instrument(Instrument::new(id("USD/JPY.SIM"), 3, 0)));
    barrier(&engine).await;

    assert_eq!(instruments.try_recv().unwrap().id, id("USD/JPY.SIM"));
    assert_eq!(engine.status().dropped_data_count, 0);
    engine.dispose();
}

#[tokio::test]
async fn bars_are_routed_by_bar_type() {
    let (engine, client) = running("SIM").await;
    let mut bars = engine.hub().bars_rx();
    let minute: BarType = "AUD/USD.SIM-1-MINUTE-BID".parse().unwrap();
    let hour: BarType = "AUD/USD.SIM-1-HOUR-BID".parse().unwrap();
    engine.subscribe_bars(&minute).await.unwrap();

    for bar_type in [&hour, &minute] {
        client.publish(Data::Bar(Bar {
            bar_type: bar_type.clone(),
            open: Decimal::ONE,
            high: Decimal::TWO,
            low: Decimal::ONE,
            close: Decimal::TWO,
            volume: Decimal::ONE_HUNDRED,
            ts_event: Utc::now(),
        }));
    }
    barrier(&engine).await;

    assert_eq!(bars.try_recv().unwrap().bar_type, minute);
    assert!(matches!(bars.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(engine.status().dropped_data_count, 1);
    engine.dispose();
}

#[tokio::test]
async fn reset_keeps_subscriptions() {
    let (engine, client) = running("SIM").await;
    let subscription = Subscription::quotes(&id("AUD/USD.SIM"));
    engine.subscribe(subscription.clone()).await.unwrap();

    engine.reset().await.unwrap();

    assert_eq!(client.calls().resets, 1);
    assert!(client.is_subscribed(&subscription));
    assert_eq!(engine.status().clients[0].subscriptions, 1);
    assert_eq!(engine.request_count(), 0);
    engine.dispose();
}

#[tokio::test]
async fn dispose_releases_clients_once() {
    let (engine, client) = running("SIM").await;
    engine.subscribe_quotes(&id("AUD/USD.SIM")).await.unwrap();

    engine.dispose();
    engine.join().await.unwrap();
    engine.dispose();

    assert_eq!(client.calls().disposes, 1);
    assert_eq!(client.subscription_count(), 0);
    assert_eq!(engine.status().clients[0].state, ConnectionState::Disposed);
    assert_eq!(
        engine.subscribe_quotes(&id("AUD/USD.SIM")).await.unwrap_err(),
        EngineError::Disposed
    );
}
