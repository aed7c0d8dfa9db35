use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::ops::Range;

/// Payload published on `readings/<device_id>`
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub device_id: i64,
    pub temperature: f64,
    pub humidity: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub temperature: Range<f64>,
    pub humidity: Range<f64>,
    /// Probability that a value is drawn from the full sensor range instead
    pub outlier_rate: f64,
}

impl Profile {
    pub fn generate(&self, rng: &mut impl Rng, device_id: i64, timestamp: DateTime<Utc>) -> Reading {
        let temperature = if rng.gen_bool(self.outlier_rate) {
            rng.gen_range(-50.0..100.0)
        } else {
            rng.gen_range(self.temperature.clone())
        };

        let humidity = if rng.gen_bool(self.outlier_rate) {
            rng.gen_range(0.0..100.0)
        } else {
            rng.gen_range(self.humidity.clone())
        };

        Reading {
            device_id,
            temperature: round1(temperature),
            humidity: round1(humidity),
            timestamp,
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
