use axum::{routing::get, Router};
use minesense_server::actuation::BuzzerController;
use minesense_server::config::Config;
use minesense_server::pipeline::IngestionPipeline;
use minesense_server::rest::{self, AppState};
use minesense_server::store::memory::MemoryStore;
use minesense_server::store::postgres::{make_pool, PgStore};
use minesense_server::store::Stores;
use minesense_server::{hub, metrics, mqtt};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    info!("Starting MineSense server");
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics()?;

    let stores = match &config.database_url {
        Some(url) => {
            info!("Database: {}", url.split('@').last().unwrap_or("***"));
            let pool = make_pool(url, config.db_max_connections).await?;
            Stores::shared(Arc::new(PgStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (data is lost on exit)");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let (hub, hub_worker) = hub::channel(config.ws_write_timeout);
    let hub_handle = tokio::spawn(hub_worker.run());

    let pipeline = IngestionPipeline::new(stores.readings.clone(), stores.alerts.clone(), hub.clone());
    let buzzer = BuzzerController::new(stores.devices.clone(), hub.clone(), config.buzzer_window);

    let mqtt_handle = match config.mqtt_broker.clone() {
        Some(broker) => {
            let client_id = format!("minesense-{}", uuid::Uuid::new_v4());
            let port = config.mqtt_port;
            let topic = config.mqtt_topic.clone();
            let pipeline = pipeline.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = mqtt::run_mqtt(broker, port, topic, client_id, pipeline).await {
                    error!("MQTT task failed: {}", e);
                }
            }))
        }
        None => {
            info!("MQTT_BROKER not set, MQTT ingestion disabled");
            None
        }
    };
    let mqtt_done = async move {
        match mqtt_handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState {
            pipeline,
            buzzer,
            devices: stores.devices.clone(),
            images: stores.images.clone(),
            hub,
        }));

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_done => {
            error!("MQTT task terminated");
        }
        _ = hub_handle => {
            error!("Broadcast hub terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
