use super::dedup::{record_opened, record_suppressed};
use super::evaluator::evaluate_for_device;
use super::Engine;
use crate::errors::{Error, Result};
use crate::metrics::{
    INGEST_LATENCY_SECONDS, READINGS_TOTAL, REJECTED_READINGS_TOTAL, STORE_FAILURES_TOTAL,
};
use crate::model::{Alarm, Device, NewAlarm, NewReading, Reading};
use crate::validate::validate_reading;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Result of ingesting one reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ingested {
    pub reading: Reading,
    pub alarms: Vec<Alarm>,
}

impl Engine {
    /// Stores a reading and, when its device is switched on, opens an alarm
    /// for every alert limit it violates. Alarms are stamped with the
    /// reading's own timestamp.
    pub async fn ingest(&self, reading: NewReading) -> Result<Ingested> {
        let start = Instant::now();
        let result = self.ingest_inner(reading).await;

        match &result {
            Ok(_) => {
                READINGS_TOTAL.inc();
                INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
            }
            Err(Error::Validation(_)) | Err(Error::NotFound { .. }) | Err(Error::Conflict(_)) => {
                REJECTED_READINGS_TOTAL.inc()
            }
            Err(_) => STORE_FAILURES_TOTAL.inc(),
        }
        result
    }

    async fn ingest_inner(&self, reading: NewReading) -> Result<Ingested> {
        validate_reading(&reading)?;

        let timestamp = reading.timestamp.unwrap_or_else(Utc::now);
        let recorded = self
            .store
            .record_reading(&reading, timestamp, &threshold_alarms)
            .await?;
        debug!(
            device_id = recorded.reading.device_id,
            reading_id = recorded.reading.id,
            temperature = recorded.reading.temperature,
            humidity = recorded.reading.humidity,
            replay = !recorded.created,
            "Reading stored"
        );

        for alarm in &recorded.opened {
            record_opened(alarm);
        }
        for alarm_type in recorded.suppressed {
            record_suppressed(recorded.reading.device_id, alarm_type);
        }

        Ok(Ingested {
            reading: recorded.reading,
            alarms: recorded.opened,
        })
    }
}

/// Threshold alarms for a stored reading, stamped with its timestamp.
fn threshold_alarms(device: &Device, reading: &Reading) -> Vec<NewAlarm> {
    evaluate_for_device(device, reading.temperature, reading.humidity)
        .into_iter()
        .map(|candidate| NewAlarm {
            device_id: device.id,
            alarm_type: candidate.alarm_type,
            triggered_value: candidate.value,
            timestamp: reading.timestamp,
        })
        .collect()
}
