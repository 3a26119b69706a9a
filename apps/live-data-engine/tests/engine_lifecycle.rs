//! Engine Lifecycle Integration Tests
//!
//! Tests start/stop/dispose transitions and the status snapshot exposed
//! to the health endpoint.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use live_data_engine::{
    ClientId, CorrelationId, EngineConfig, EngineError, EngineState, HubConfig, LiveDataEngine,
    SimulatedDataClient, Subscription, Venue,
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

#[tokio::test]
async fn stopped_engine_rejects_commands() {
    let engine = LiveDataEngine::default();
    let _client = sim(&engine, "SIM");

    assert_eq!(engine.connect().await.unwrap_err(), EngineError::NotRunning);
    assert_eq!(
        engine
            .request_instruments(CorrelationId::new())
            .await
            .unwrap_err(),
        EngineError::NotRunning
    );
    assert_eq!(engine.command_count(), 0);
}

#[tokio::test]
async fn restart_keeps_subscriptions_and_connections() {
    let engine = LiveDataEngine::default();
    let client = sim(&engine, "SIM");
    let subscription = Subscription::quotes(&"AUD/USD.SIM".parse().unwrap());

    engine.start().unwrap();
    engine.connect().await.unwrap();
    engine.subscribe(subscription.clone()).await.unwrap();
    engine.stop();
    engine.stop();
    engine.join().await.unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.start().unwrap();
    assert!(engine.is_connected());
    engine.subscribe(subscription.clone()).await.unwrap();

    assert_eq!(client.calls().subscribes, 1);
    assert!(client.is_subscribed(&subscription));
    engine.dispose();
}

#[tokio::test]
async fn disposed_engine_cannot_restart() {
    let engine = LiveDataEngine::default();
    let _client = sim(&engine, "SIM");
    engine.start().unwrap();
    engine.dispose();
    engine.join().await.unwrap();

    assert_eq!(engine.start().unwrap_err(), EngineError::Disposed);
    assert_eq!(engine.reset().await.unwrap_err(), EngineError::Disposed);
    assert_eq!(engine.state(), EngineState::Disposed);
}

#[tokio::test]
async fn status_snapshot_serializes_for_health_reporting() {
    let engine = LiveDataEngine::default();
    let _sim = sim(&engine, "SIM");
    let _binance = sim(&engine, "BINANCE");
    engine.start().unwrap();
    engine.connect().await.unwrap();

    let status = engine.status();
    assert!(status.all_connected());
    assert_eq!(status.command_count, 1);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["state"], "running");
    assert_eq!(json["clients"].as_array().unwrap().len(), 2);
    assert_eq!(json["clients"][0]["state"], "connected");
    engine.dispose();
}

#[tokio::test]
async fn engine_built_from_configuration() {
    let config = EngineConfig::from_lookup(|key| match key {
        "LIVE_DATA_QUOTES_CAPACITY" => Some("16".to_string()),
        "LIVE_DATA_SIM_VENUES" => Some("SIM,BINANCE".to_string()),
        _ => None,
    })
    .unwrap();

    let engine = LiveDataEngine::new(HubConfig::from(config.hub));
    for venue in &config.sim.venues {
        sim(&engine, venue.as_str());
    }
    engine.start().unwrap();
    engine.connect().await.unwrap();

    assert_eq!(engine.status().connected_clients(), 2);
    engine.dispose();
}
