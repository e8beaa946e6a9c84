use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "venuebook_requests_total";

/// Histogram: wire request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "venuebook_request_duration_seconds";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: submissions. Labels: outcome (accepted, conflicted, rejected).
pub const SUBMISSIONS_TOTAL: &str = "venuebook_submissions_total";

/// Counter: committed lifecycle transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "venuebook_transitions_total";

/// Counter: refused transitions. Labels: reason (invalid_state, stale_conflict).
pub const TRANSITIONS_REFUSED_TOTAL: &str = "venuebook_transitions_refused_total";

/// Counter: effects published to the hub. Labels: kind.
pub const EFFECTS_PUBLISHED_TOTAL: &str = "venuebook_effects_published_total";

/// Counter: bookings moved by the sweeper. Labels: action (complete, reject).
pub const SWEPT_TOTAL: &str = "venuebook_swept_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venuebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venuebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venuebook_connections_rejected_total";

/// Gauge: bookings currently holding capacity.
pub const LIVE_BOOKINGS: &str = "venuebook_live_bookings";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "venuebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "venuebook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "venuebook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
