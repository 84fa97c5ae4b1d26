//! Metrics module
//!
//! Prometheus counters and histograms for the relay, exposed as text at
//! `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Relay metrics
    pub static ref RELAY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "photo_relay_requests_total",
        "Upload requests handled by the relay",
        &["mode", "status"]
    ).unwrap();

    pub static ref RELAY_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "photo_relay_request_duration_seconds",
        "Upload request duration in seconds",
        &["mode"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    pub static ref FILES_STORED_TOTAL: Counter = register_counter!(
        "photo_relay_files_stored_total",
        "Files stored in the media store"
    ).unwrap();

    pub static ref STORED_BYTES_TOTAL: Counter = register_counter!(
        "photo_relay_stored_bytes_total",
        "Bytes of original file data stored"
    ).unwrap();

    pub static ref FILES_REJECTED_TOTAL: CounterVec = register_counter_vec!(
        "photo_relay_files_rejected_total",
        "Files refused by relay validation",
        &["reason"]
    ).unwrap();

    // Media store metrics
    pub static ref STORE_DURATION: Histogram = register_histogram!(
        "photo_relay_store_duration_seconds",
        "Media store call duration in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "photo_relay_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a finished relay request
pub fn record_request(mode: &str, status: u16, duration_secs: f64) {
    RELAY_REQUESTS_TOTAL
        .with_label_values(&[mode, &status.to_string()])
        .inc();
    RELAY_REQUEST_DURATION
        .with_label_values(&[mode])
        .observe(duration_secs);
}

/// Record a file stored successfully
pub fn record_file_stored(bytes: u64) {
    FILES_STORED_TOTAL.inc();
    STORED_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a file refused by validation
pub fn record_rejection(reason: &str) {
    FILES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

/// Record media store call duration
pub fn record_store_duration(duration_secs: f64) {
    STORE_DURATION.observe(duration_secs);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the default registry in Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
