//! Metrics facade helpers
//!
//! Thin wrappers over the `metrics` macros so the counter names and labels
//! live in one place:
//!
//! - `rotor_selections_total` (counter): label `strategy`
//! - `rotor_selection_fallbacks_total` (counter): label `kind`
//! - `rotor_attempt_outcomes_total` (counter): label `outcome`
//! - `rotor_persist_failures_total` (counter)
//!
//! The host installs whatever recorder it wants; without one these are no-ops.

/// Record a successful strategy selection.
pub fn record_selection(strategy: &'static str) {
    metrics::counter!("rotor_selections_total", "strategy" => strategy).increment(1);
}

/// Record a selection that fell through to an availability fallback.
pub fn record_fallback(kind: &'static str) {
    metrics::counter!("rotor_selection_fallbacks_total", "kind" => kind).increment(1);
}

/// Record one attempt outcome in the dispatch loop.
pub fn record_outcome(outcome: &'static str) {
    metrics::counter!("rotor_attempt_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record a best-effort persistence failure (logged, never propagated).
pub fn record_persist_failure() {
    metrics::counter!("rotor_persist_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_are_noops_without_a_recorder() {
        // Metrics calls must not panic when no recorder is installed.
        record_selection("hybrid");
        record_fallback("window_expired");
        record_outcome("success");
        record_persist_failure();
    }
}
