use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static ORDERS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("orders_created_total", "Total number of orders created").unwrap()
});

/// Callback outcomes: paid, payment_failed, replay, not_found, mac_mismatch, invalid.
pub static CALLBACKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("payment_callbacks_total", "Payment callbacks by outcome"),
        &["outcome"],
    )
    .unwrap()
});

/// Fulfillment job executions: fulfilled, retried.
pub static FULFILLMENT_JOBS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fulfillment_jobs_total",
            "Fulfillment job executions by result",
        ),
        &["result"],
    )
    .unwrap()
});

/// Register all metrics with the registry
pub fn register_metrics() {
    REGISTRY.register(Box::new(ORDERS_CREATED.clone())).unwrap();
    REGISTRY
        .register(Box::new(CALLBACKS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(FULFILLMENT_JOBS.clone()))
        .unwrap();
}

/// Render the registry in the Prometheus text exposition format.
pub fn metrics_output() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
