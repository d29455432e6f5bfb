use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings created. Labels: payment_method.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: booking status changes. Labels: from, to, trigger.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "innkeep_booking_transitions_total";

/// Counter: gateway notifications handled. Labels: outcome.
pub const WEBHOOKS_TOTAL: &str = "innkeep_webhooks_total";

/// Gauge: rooms loaded in the engine.
pub const ROOMS_ACTIVE: &str = "innkeep_rooms_active";

// ── Scheduled sweeps ────────────────────────────────────────────

/// Counter: sweep runs. Labels: job, status.
pub const SWEEP_RUNS_TOTAL: &str = "innkeep_sweep_runs_total";

/// Counter: bookings moved by sweeps. Labels: job.
pub const SWEEP_TRANSITIONS_TOTAL: &str = "innkeep_sweep_transitions_total";

/// Histogram: sweep duration in seconds. Labels: job.
pub const SWEEP_DURATION_SECONDS: &str = "innkeep_sweep_duration_seconds";

// ── Outbox ──────────────────────────────────────────────────────

/// Counter: post-commit side effects. Labels: kind, status.
pub const SIDE_EFFECTS_TOTAL: &str = "innkeep_side_effects_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
