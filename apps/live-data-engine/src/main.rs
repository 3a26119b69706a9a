//! Live Data Engine Binary
//!
//! Runs the engine against simulated venues, streaming generated quotes to
//! the data hub and serving health and metrics over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin live-data-engine
//! ```
//!
//! # Environment Variables
//!
//! - `LIVE_DATA_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `LIVE_DATA_INSTRUMENTS_CAPACITY`: Instrument channel capacity (default: 1000)
//! - `LIVE_DATA_QUOTES_CAPACITY`: Quote channel capacity (default: 10000)
//! - `LIVE_DATA_TRADES_CAPACITY`: Trade channel capacity (default: 10000)
//! - `LIVE_DATA_BARS_CAPACITY`: Bar channel capacity (default: 1000)
//! - `LIVE_DATA_SIM_VENUES`: Comma-separated simulated venues (default: SIM)
//! - `LIVE_DATA_SIM_LATENCY_MS`: Simulated response latency (default: 5)
//! - `LIVE_DATA_SIM_QUOTE_INTERVAL_MS`: Generated quote interval (default: 1000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: live-data-engine)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use live_data_engine::infrastructure::health::{HealthServer, HealthServerState};
use live_data_engine::infrastructure::telemetry;
use live_data_engine::{
    ClientId, CorrelationId, EngineConfig, HubConfig, Instrument, InstrumentId, LiveDataEngine,
    ResponsePayload, SimulatedDataClient, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Symbols listed on every simulated venue.
const SIM_SYMBOLS: &[&str] = &["AUD/USD", "EUR/USD", "USD/JPY"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Live Data Engine");

    let _metrics_handle = init_metrics();

    let config = EngineConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let engine = Arc::new(LiveDataEngine::new(HubConfig::from(config.hub)));

    // One simulated client per venue, each listing the demo symbols
    let mut clients = Vec::with_capacity(config.sim.venues.len());
    for venue in &config.sim.venues {
        let client = Arc::new(
            SimulatedDataClient::new(
                ClientId::new(venue.as_str())?,
                venue.clone(),
                engine.data_sink(),
            )
            .with_latency(config.sim.latency),
        );
        for symbol in SIM_SYMBOLS {
            let instrument_id: InstrumentId = format!("{symbol}.{venue}").parse()?;
            client.add_instrument(Instrument::new(instrument_id, 5, 0));
        }
        engine.register_client(client.clone())?;
        clients.push(client);
    }

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    engine.start()?;
    if let Err(e) = engine.connect().await {
        tracing::error!(error = %e, "Not every data client connected");
    }

    // Catalog snapshot across every venue
    match engine.request_instruments(CorrelationId::new()).await {
        Ok(pending) => match pending.await {
            Ok(response) => {
                if let ResponsePayload::Instruments(instruments) = response.payload {
                    tracing::info!(count = instruments.len(), "Instrument catalog loaded");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Instrument catalog request failed"),
        },
        Err(e) => tracing::warn!(error = %e, "Instrument catalog request rejected"),
    }

    // Stream quotes for every listed instrument
    let mut feeds = Vec::new();
    for client in &clients {
        for instrument in client.instruments() {
            engine.subscribe_quotes(&instrument.id).await?;
            feeds.push(client.spawn_quote_feed(
                instrument,
                config.sim.quote_interval,
                shutdown_token.clone(),
            ));
        }
    }
    let consumer = spawn_quote_logger(&engine, shutdown_token.clone());

    tracing::info!(
        venues = clients.len(),
        feeds = feeds.len(),
        "Live data engine ready"
    );

    await_shutdown(shutdown_token).await;

    for feed in feeds {
        let _ = feed.await;
    }
    let _ = consumer.await;

    if let Err(e) = engine.disconnect().await {
        tracing::warn!(error = %e, "Disconnect during shutdown failed");
    }
    engine.stop();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, engine.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Engine loop ended abnormally"),
        Err(_) => tracing::warn!("Engine loop did not stop within the shutdown timeout"),
    }
    engine.dispose();

    tracing::info!(
        responses = engine.response_count(),
        data = engine.data_count(),
        "Live data engine stopped"
    );
    Ok(())
}

/// Consume the quote channel, logging at debug.
fn spawn_quote_logger(engine: &LiveDataEngine, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut quotes = engine.hub().quotes_rx();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                result = quotes.recv() => match result {
                    Ok(quote) => tracing::debug!(
                        instrument_id = %quote.instrument_id,
                        bid = %quote.bid_price,
                        ask = %quote.ask_price,
                        "Quote"
                    ),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "Quote receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    let venues: Vec<&str> = config.sim.venues.iter().map(|v| v.as_str()).collect();
    tracing::info!(
        health_port = config.server.health_port,
        venues = ?venues,
        latency_ms = config.sim.latency.as_millis(),
        "Configuration loaded"
    );
    tracing::debug!(
        instruments_capacity = config.hub.instruments_capacity,
        quotes_capacity = config.hub.quotes_capacity,
        trades_capacity = config.hub.trades_capacity,
        bars_capacity = config.hub.bars_capacity,
        "Data hub capacities"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
