//! Observability setup: structured logging and metrics (Prometheus).

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,strata=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize Prometheus metrics exporter.
/// Returns an error if the listen address cannot be bound.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record a completed engine operation with its elapsed time.
/// `op` is one of: "set", "get", "remove", "transaction", "vacuum",
/// "import", "export", "migrate".
pub fn record_engine_op(op: &str, duration_us: u64, success: bool) {
    metrics::counter!("strata_ops_total", "op" => op.to_string(), "success" => success.to_string())
        .increment(1);
    metrics::histogram!("strata_op_duration_us", "op" => op.to_string())
        .record(duration_us as f64);
}

/// Record the engine counter snapshot as gauges.
#[allow(clippy::too_many_arguments)]
pub fn record_engine_counters(
    reads: u64,
    writes: u64,
    removes: u64,
    transactions: u64,
    rollbacks: u64,
    vacuums: u64,
    evictions: u64,
    broadcasts: u64,
    corrupt_reads: u64,
    lock_failures: u64,
) {
    metrics::gauge!("strata_reads_total").set(reads as f64);
    metrics::gauge!("strata_writes_total").set(writes as f64);
    metrics::gauge!("strata_removes_total").set(removes as f64);
    metrics::gauge!("strata_transactions_total").set(transactions as f64);
    metrics::gauge!("strata_rollbacks_total").set(rollbacks as f64);
    metrics::gauge!("strata_vacuums_total").set(vacuums as f64);
    metrics::gauge!("strata_evictions_total").set(evictions as f64);
    metrics::gauge!("strata_broadcasts_total").set(broadcasts as f64);
    metrics::gauge!("strata_corrupt_reads_total").set(corrupt_reads as f64);
    metrics::gauge!("strata_lock_failures_total").set(lock_failures as f64);
}

/// Record quota occupancy for a namespace.
pub fn record_quota_metrics(namespace: &str, estimated_bytes: u64, soft_limit: u64, hard_limit: u64) {
    let ns = namespace.to_string();
    metrics::gauge!("strata_namespace_bytes", "namespace" => ns.clone())
        .set(estimated_bytes as f64);
    metrics::gauge!("strata_quota_soft_bytes", "namespace" => ns.clone()).set(soft_limit as f64);
    metrics::gauge!("strata_quota_hard_bytes", "namespace" => ns).set(hard_limit as f64);
}

/// Flag whether the namespace runs with real authenticated encryption.
/// A non-zero `degraded` gauge means confidentiality is NOT provided.
pub fn record_crypto_posture(namespace: &str, encryption_enabled: bool, degraded: u64) {
    let ns = namespace.to_string();
    metrics::gauge!("strata_encryption_enabled", "namespace" => ns.clone())
        .set(if encryption_enabled { 1.0 } else { 0.0 });
    metrics::gauge!("strata_crypto_degraded", "namespace" => ns).set(degraded as f64);
}
