//! Prometheus Metrics Module
//!
//! Process-wide chat metrics exposed on `GET /metrics`.
//!
//! # Metrics Collected
//! - Connected websocket clients
//! - Persisted chat messages
//! - Deliveries dropped because a client's outbound queue was full
//! - Rate-limit rejections by scope
//! - Message bus publish failures and duplicate deliveries

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "chatter";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

pub static CONNECTED_CLIENTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connected_clients", "Clients currently registered with the hub")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create CONNECTED_CLIENTS metric")
});

pub static MESSAGES_PERSISTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("messages_persisted_total", "Chat messages written to storage")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create MESSAGES_PERSISTED_TOTAL metric")
});

/// Messages the hub could not store and therefore never broadcast
pub static MESSAGES_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "messages_dropped_total",
            "Chat messages dropped because persistence failed",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create MESSAGES_DROPPED_TOTAL metric")
});

pub static DELIVERIES_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "deliveries_dropped_total",
            "Events not enqueued because a client's outbound queue was full",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create DELIVERIES_DROPPED_TOTAL metric")
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("rate_limited_total", "Requests and frames rejected by a rate limiter")
            .namespace(NAMESPACE),
        &["scope"], // "ip", "message", "typing"
    )
    .expect("Failed to create RATE_LIMITED_TOTAL metric")
});

pub static BUS_PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("bus_publish_failures_total", "Failed message bus publishes")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create BUS_PUBLISH_FAILURES_TOTAL metric")
});

pub static BUS_DUPLICATES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "bus_duplicates_total",
            "Bus deliveries skipped as already seen",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create BUS_DUPLICATES_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTED_CLIENTS.clone()))
        .expect("Failed to register CONNECTED_CLIENTS");
    registry
        .register(Box::new(MESSAGES_PERSISTED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_PERSISTED_TOTAL");
    registry
        .register(Box::new(MESSAGES_DROPPED_TOTAL.clone()))
        .expect("Failed to register MESSAGES_DROPPED_TOTAL");
    registry
        .register(Box::new(DELIVERIES_DROPPED_TOTAL.clone()))
        .expect("Failed to register DELIVERIES_DROPPED_TOTAL");
    registry
        .register(Box::new(RATE_LIMITED_TOTAL.clone()))
        .expect("Failed to register RATE_LIMITED_TOTAL");
    registry
        .register(Box::new(BUS_PUBLISH_FAILURES_TOTAL.clone()))
        .expect("Failed to register BUS_PUBLISH_FAILURES_TOTAL");
    registry
        .register(Box::new(BUS_DUPLICATES_TOTAL.clone()))
        .expect("Failed to register BUS_DUPLICATES_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn set_connected_clients(count: usize) {
    CONNECTED_CLIENTS.set(count as i64);
}

pub fn record_rate_limited(scope: &str) {
    RATE_LIMITED_TOTAL.with_label_values(&[scope]).inc();
}
