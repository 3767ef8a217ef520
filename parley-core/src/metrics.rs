// ABOUTME: Metric recording helpers over the `metrics` facade.
// ABOUTME: No exporter is installed here; binaries choose where samples go.

use std::time::Duration;

pub const TURNS_TOTAL: &str = "parley_turns_total";
pub const PROGRESS_EVENTS_TOTAL: &str = "parley_progress_events_total";
pub const PERSISTENCE_FAILURES_TOTAL: &str = "parley_persistence_failures_total";
pub const TURN_DURATION_SECONDS: &str = "parley_turn_duration_seconds";

/// Count a finished turn; `outcome` is "completed" or "failed"
pub fn record_turn(outcome: &'static str) {
    metrics::counter!(TURNS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_progress_event() {
    metrics::counter!(PROGRESS_EVENTS_TOTAL).increment(1);
}

pub fn record_persistence_failure() {
    metrics::counter!(PERSISTENCE_FAILURES_TOTAL).increment(1);
}

pub fn record_turn_duration(backend: &'static str, elapsed: Duration) {
    metrics::histogram!(TURN_DURATION_SECONDS, "backend" => backend).record(elapsed.as_secs_f64());
}
