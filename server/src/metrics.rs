use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_messages_total",
        "Total telemetry messages received (HTTP and MQTT)"
    ))
    .unwrap();
    pub static ref READINGS_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_readings_stored_total",
        "Total sensor readings durably persisted"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_invalid_messages_total",
        "Total messages rejected as malformed or unattributable"
    ))
    .unwrap();
    pub static ref INGEST_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_ingest_failures_total",
        "Total messages whose reading could not be persisted"
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_alerts_raised_total",
        "Total hazard alerts persisted"
    ))
    .unwrap();
    pub static ref ALERT_PERSIST_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_alert_persist_failures_total",
        "Total hazard alerts that matched but failed to persist"
    ))
    .unwrap();
    pub static ref DB_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_db_retries_total",
        "Total retried reading inserts after transient database failures"
    ))
    .unwrap();
    pub static ref BROADCASTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_broadcasts_total",
        "Total events fanned out by the hub"
    ))
    .unwrap();
    pub static ref CONNECTION_EVICTIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_connection_evictions_total",
        "Total observer connections evicted after a failed write"
    ))
    .unwrap();
    pub static ref BUZZER_ACTIVATIONS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "minesense_buzzer_activations_total",
        "Total buzzer activations"
    ))
    .unwrap();
    pub static ref HUB_CONNECTIONS: Gauge = Gauge::with_opts(Opts::new(
        "minesense_hub_connections",
        "Observer connections currently registered with the hub"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "minesense_ingest_latency_seconds",
            "Time taken to run one message through the ingestion pipeline"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_STORED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_RAISED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERT_PERSIST_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BROADCASTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONNECTION_EVICTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUZZER_ACTIVATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HUB_CONNECTIONS.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
