use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: ledger operations. Labels: op, outcome.
pub const OPERATIONS_TOTAL: &str = "roomledger_operations_total";

/// Histogram: ledger operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "roomledger_operation_duration_seconds";

/// Counter: creations rejected because the room was taken.
pub const CONFLICTS_TOTAL: &str = "roomledger_conflicts_total";

/// Counter: status transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "roomledger_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: rooms tracked by the ledger.
pub const ROOMS_TRACKED: &str = "roomledger_rooms";

/// Counter: pending holds cancelled by the reaper.
pub const HOLDS_EXPIRED_TOTAL: &str = "roomledger_holds_expired_total";

/// Counter: confirmed reservations marked as no-shows.
pub const NO_SHOWS_TOTAL: &str = "roomledger_no_shows_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomledger_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record one finished operation: outcome counter plus latency.
pub fn record<T, E>(op: &'static str, started: std::time::Instant, result: &Result<T, E>, error_kind: impl Fn(&E) -> &'static str) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => error_kind(e),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
}
