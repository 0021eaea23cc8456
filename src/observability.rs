use std::net::SocketAddr;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "clubslot_bookings_total";

/// Counter: cancellations. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "clubslot_cancellations_total";

/// Histogram: end-to-end `book` latency in seconds.
pub const BOOK_DURATION_SECONDS: &str = "clubslot_book_duration_seconds";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: creates rejected by the write-time re-check.
pub const LEDGER_CONFLICTS_TOTAL: &str = "clubslot_ledger_conflicts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "clubslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "clubslot_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "clubslot_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
