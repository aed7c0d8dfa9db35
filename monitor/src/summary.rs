use crate::model::{DeviceId, Reading};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Min/max/average of a device's readings over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSummary {
    pub device_id: DeviceId,
    pub count: i64,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub temperature: Stats,
    pub humidity: Stats,
}

pub fn summarize(device_id: DeviceId, readings: &[Reading]) -> Option<ReadingSummary> {
    let first = readings.iter().map(|r| r.timestamp).min()?;
    let last = readings.iter().map(|r| r.timestamp).max()?;

    Some(ReadingSummary {
        device_id,
        count: readings.len() as i64,
        first,
        last,
        temperature: stats(readings.iter().map(|r| r.temperature)),
        humidity: stats(readings.iter().map(|r| r.humidity)),
    })
}

fn stats(values: impl Iterator<Item = f64>) -> Stats {
    let (mut min, mut max, mut sum, mut n) = (f64::INFINITY, f64::NEG_INFINITY, 0.0, 0usize);
    for v in values {
        min = min.min(v);
        max = max.max(v);
        sum += v;
        n += 1;
    }
    Stats {
        min,
        max,
        avg: sum / n as f64,
    }
}
