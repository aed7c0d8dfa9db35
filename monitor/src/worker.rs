use crate::engine::Engine;
use crate::errors::Result;
use crate::model::NewReading;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;

/// Drains readings from the MQTT listener into the engine, one at a time.
pub async fn run_ingest_worker(mut rx: mpsc::Receiver<NewReading>, engine: Engine) {
    info!("Starting ingestion worker");

    while let Some(reading) = rx.recv().await {
        let device_id = reading.device_id;
        match ingest_with_retry(&engine, reading).await {
            Ok(alarms) if alarms > 0 => {
                debug!(device_id, alarms, "Reading ingested, alarms opened");
            }
            Ok(_) => {}
            Err(e) => error!(device_id, "Failed to ingest reading: {}", e),
        }
    }

    info!("Channel closed, ingestion worker stopped");
}

/// Retries transient store failures up to three times with exponential
/// backoff: 100ms, 200ms, 400ms. The timestamp is pinned before the first
/// attempt so a retry replays the same reading, which the store accepts
/// without opening alarms twice.
async fn ingest_with_retry(engine: &Engine, mut reading: NewReading) -> Result<usize> {
    reading.timestamp.get_or_insert_with(Utc::now);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match engine.ingest(reading.clone()).await {
            Ok(ingested) => {
                if attempt > 1 {
                    info!("Reading ingested after {} attempts", attempt);
                }
                return Ok(ingested.alarms.len());
            }
            Err(e) => {
                if attempt > MAX_RETRIES || !e.is_transient() {
                    return Err(e);
                }

                let backoff_ms = 100 * 2_u64.pow(attempt - 1);
                warn!(
                    "Failed to ingest reading (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt,
                    MAX_RETRIES + 1,
                    e,
                    backoff_ms
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}
