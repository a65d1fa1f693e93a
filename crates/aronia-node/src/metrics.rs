//! Metric instrumentation points.
//!
//! Thin wrappers over the `metrics` facade; the embedding application
//! decides whether and where to install a recorder.

/// Session count gauges.
pub mod gauges {
    /// Increment the active sessions gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("aronia_sessions_active").increment(1.0);
    }

    /// Decrement the active sessions gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("aronia_sessions_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a verified inbound frame with its type label.
    pub fn frames_rx_total(frame_type: &'static str) {
        metrics::counter!("aronia_frames_rx_total", "type" => frame_type).increment(1);
    }

    /// Record a dropped inbound frame with the drop reason.
    pub fn frames_dropped_total(reason: &'static str) {
        metrics::counter!("aronia_frames_dropped_total", "reason" => reason).increment(1);
    }

    /// Record an outbound request outcome.
    pub fn requests_total(outcome: &'static str) {
        metrics::counter!("aronia_requests_total", "outcome" => outcome).increment(1);
    }

    /// Record an inbound introduction outcome.
    pub fn introductions_total(outcome: &'static str) {
        metrics::counter!("aronia_introductions_total", "outcome" => outcome).increment(1);
    }

    /// Record an admission decision.
    pub fn admissions_total(outcome: &'static str) {
        metrics::counter!("aronia_admissions_total", "outcome" => outcome).increment(1);
    }
}
