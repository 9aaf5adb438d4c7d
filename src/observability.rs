//! Observability: metrics and tracing helpers
//!
//! Counters, gauges, and histograms are emitted through the `metrics`
//! facade; structured logs carry `agent_id` / `event_id` / `event_type` /
//! `operation` / `correlation_id` fields at the call sites.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Why the router or a receiving actor discarded an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Hop limit reached
    HopExceeded,
    /// Target already appears in the publisher chain
    LoopDetected,
    /// The envelope's stop flag was set
    StopPropagation,
    /// A full subscriber queue under the drop policy
    Backpressure,
    /// Envelope id already seen by this receiver
    Duplicate,
}

impl DropReason {
    /// Stable label value for metrics
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HopExceeded => "hop_exceeded",
            Self::LoopDetected => "loop_detected",
            Self::StopPropagation => "stop_propagation",
            Self::Backpressure => "backpressure",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Record a published envelope and its routing latency
pub fn record_event_published(duration: Duration) {
    counter!("arbor_events_published_total").increment(1);
    histogram!("arbor_publish_duration_seconds").record(duration);
}

/// Record a handled envelope and its dispatch latency
pub fn record_event_handled(duration: Duration) {
    counter!("arbor_events_handled_total").increment(1);
    histogram!("arbor_handle_duration_seconds").record(duration);
}

/// Record a dropped envelope by reason
pub fn record_event_dropped(reason: DropReason) {
    counter!("arbor_events_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record a recovered handler failure
pub fn record_handler_exception() {
    counter!("arbor_handler_exceptions_total").increment(1);
}

/// Record a subscription retry attempt
pub fn record_subscription_retry() {
    counter!("arbor_subscription_retries_total").increment(1);
}

/// Record an actor entering the active set
pub fn record_actor_activated() {
    counter!("arbor_actor_activations_total").increment(1);
    gauge!("arbor_active_actors").increment(1.0);
}

/// Record an actor leaving the active set
pub fn record_actor_deactivated() {
    gauge!("arbor_active_actors").decrement(1.0);
}

/// Record a committed event-log append of `count` events
pub fn record_events_committed(count: usize) {
    counter!("arbor_state_events_committed_total").increment(count as u64);
}

/// Installs a `tracing` subscriber reading `RUST_LOG`, returning whether
/// this call installed it. Safe to call more than once.
pub fn init_tracing() -> bool {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reasons_have_stable_labels() {
        assert_eq!(DropReason::HopExceeded.as_str(), "hop_exceeded");
        assert_eq!(DropReason::Duplicate.as_str(), "duplicate");
    }

    #[test]
    fn init_tracing_is_idempotent() {
        let _ = init_tracing();
        // The second call must not panic even though a subscriber is set.
        let _ = init_tracing();
    }
}
