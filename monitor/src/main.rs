use anyhow::Context;
use axum::{routing::get, Router};
use monitor::config::{Config, StorageBackend};
use monitor::engine::Engine;
use monitor::store::{make_pool, MemoryStore, PgStore, Store};
use monitor::{metrics, mqtt, rest, worker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sensor monitor");
    info!("HTTP server: {}", config.http_addr);

    metrics::init_metrics().context("failed to register metrics")?;

    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Postgres => {
            info!("Database: {}", config.redacted_database_url());
            let pool = make_pool(&config.database_url, config.db_max_connections)
                .await
                .context("failed to connect to database")?;
            Arc::new(PgStore::new(pool))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on shutdown");
            Arc::new(MemoryStore::new())
        }
    };
    let engine = Engine::new(store);

    let mut background = tokio::task::JoinSet::new();

    if config.mqtt_enabled {
        info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
        info!("Channel capacity: {}", config.channel_capacity);
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let client_id = format!("monitor-{}", uuid::Uuid::new_v4());
        let (broker, port) = (config.mqtt_broker.clone(), config.mqtt_port);
        background.spawn(async move {
            if let Err(e) = mqtt::run_mqtt(broker, port, client_id, tx).await {
                error!("MQTT task failed: {}", e);
            }
            "MQTT listener"
        });

        let worker_engine = engine.clone();
        background.spawn(async move {
            worker::run_ingest_worker(rx, worker_engine).await;
            "Ingestion worker"
        });
    } else {
        info!("MQTT ingestion disabled");
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(engine));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.http_addr))?;
    info!("HTTP server listening on {}", config.http_addr);

    background.spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
        "HTTP server"
    });

    tokio::select! {
        Some(finished) = background.join_next() => {
            match finished {
                Ok(task) => error!("{} terminated", task),
                Err(e) => error!("Background task panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    background.shutdown().await;
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
