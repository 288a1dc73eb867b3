//! Metrics module for entitlement-service.
//! Provides Prometheus metrics for entitlement decisions, usage and subscriptions.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "entitlement_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Entitlement decisions by listing type and outcome
pub static ENTITLEMENT_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Checks that were allowed because the store could not be read
pub static DEGRADED_ALLOWANCES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Checks allowed from the pool although the modifier sub-limit was already reached
pub static SUBLIMIT_OVERRIDES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Listings committed to the usage ledger
pub static LISTINGS_RECORDED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Subscription lifecycle operations
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Plan registry operations
pub static PLAN_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// gRPC request counter
pub static GRPC_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// gRPC request duration histogram
pub static GRPC_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    ENTITLEMENT_DECISIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_decisions_total",
                "Total entitlement checks by listing type and outcome"
            ),
            &["listing_type", "outcome"]
        )
        .expect("Failed to register ENTITLEMENT_DECISIONS_TOTAL")
    });

    DEGRADED_ALLOWANCES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_degraded_allowances_total",
                "Entitlement checks allowed because the store was unavailable"
            ),
            &["listing_type"]
        )
        .expect("Failed to register DEGRADED_ALLOWANCES_TOTAL")
    });

    SUBLIMIT_OVERRIDES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_sublimit_overrides_total",
                "Listings allowed from the shared pool past their modifier sub-limit"
            ),
            &["listing_type"]
        )
        .expect("Failed to register SUBLIMIT_OVERRIDES_TOTAL")
    });

    LISTINGS_RECORDED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_listings_recorded_total",
                "Total listings recorded against the usage ledger"
            ),
            &["listing_type"]
        )
        .expect("Failed to register LISTINGS_RECORDED_TOTAL")
    });

    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_subscription_operations_total",
                "Total subscription operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    PLAN_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "entitlement_plan_operations_total",
                "Total plan operations by type"
            ),
            &["operation"]
        )
        .expect("Failed to register PLAN_OPERATIONS_TOTAL")
    });

    // gRPC requests
    GRPC_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("entitlement_grpc_requests_total", "Total gRPC requests"),
            &["method", "status"]
        )
        .expect("Failed to register GRPC_REQUESTS_TOTAL")
    });

    // Entitlement checks sit on the listing hot path, so the buckets start low
    GRPC_REQUEST_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "entitlement_grpc_request_duration_seconds",
                "gRPC request duration",
                vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
            ),
            &["method"]
        )
        .expect("Failed to register GRPC_REQUEST_DURATION")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("entitlement_errors_total", "Total errors by type for alerting"),
            &["error_type", "method"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_entitlement_decision(listing_type: &str, outcome: &str) {
    if let Some(counter) = ENTITLEMENT_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[listing_type, outcome]).inc();
    }
}

pub fn record_degraded_allowance(listing_type: &str) {
    if let Some(counter) = DEGRADED_ALLOWANCES_TOTAL.get() {
        counter.with_label_values(&[listing_type]).inc();
    }
}

pub fn record_sublimit_override(listing_type: &str) {
    if let Some(counter) = SUBLIMIT_OVERRIDES_TOTAL.get() {
        counter.with_label_values(&[listing_type]).inc();
    }
}

pub fn record_listing_recorded(listing_type: &str) {
    if let Some(counter) = LISTINGS_RECORDED_TOTAL.get() {
        counter.with_label_values(&[listing_type]).inc();
    }
}

/// Record a subscription operation.
pub fn record_subscription_operation(operation: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record a plan operation.
pub fn record_plan_operation(operation: &str) {
    if let Some(counter) = PLAN_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Record a gRPC request.
pub fn record_grpc_request(method: &str, status: &str) {
    if let Some(counter) = GRPC_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, status]).inc();
    }
}

/// Record gRPC request duration.
pub fn record_grpc_request_duration(method: &str, duration_secs: f64) {
    if let Some(histogram) = GRPC_REQUEST_DURATION.get() {
        histogram
            .with_label_values(&[method])
            .observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, method: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, method]).inc();
    }
}
