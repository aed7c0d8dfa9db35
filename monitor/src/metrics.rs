use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_readings_total",
        "Total readings stored"
    ))
    .expect("metric options are valid");
    pub static ref REJECTED_READINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_rejected_readings_total",
        "Total readings rejected before reaching the store"
    ))
    .expect("metric options are valid");
    pub static ref ALARMS_OPENED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_alarms_opened_total", "Total alarms opened"),
        &["alarm_type"]
    )
    .expect("metric options are valid");
    pub static ref ALARMS_DEDUPLICATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "monitor_alarms_deduplicated_total",
            "Candidate alarms suppressed by an already open alarm"
        ),
        &["alarm_type"]
    )
    .expect("metric options are valid");
    pub static ref STORE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_store_failures_total",
        "Total store failures during ingestion"
    ))
    .expect("metric options are valid");
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_ingest_latency_seconds",
            "Time taken to store and evaluate a reading"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .expect("metric options are valid");
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_channel_full_total",
        "Total number of times the ingestion channel was full (backpressure events)"
    ))
    .expect("metric options are valid");
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REJECTED_READINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALARMS_OPENED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALARMS_DEDUPLICATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
