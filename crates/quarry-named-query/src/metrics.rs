//! Projection metrics.
//!
//! Counters and a histogram for the get-or-build state machine. These
//! complement the structured logging emitted inside each projection span.

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::query::OutputKind;

/// Cache hits (artifact already stored).
pub const CACHE_HITS: &str = "quarry_projection_cache_hits_total";

/// Build attempts by kind and outcome.
pub const BUILDS: &str = "quarry_projection_builds_total";

/// Requests answered with "build in progress".
pub const PENDING: &str = "quarry_projection_pending_total";

/// Stale in-progress builds taken over by a new request.
pub const STALE_TAKEOVERS: &str = "quarry_projection_stale_takeovers_total";

/// Build duration histogram.
pub const BUILD_DURATION: &str = "quarry_projection_build_duration_seconds";

/// Outcome label for [`BUILDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcomeLabel {
    /// Artifact stored and control record completed.
    Success,
    /// Generation or storage failed.
    Failure,
    /// The caller cancelled.
    Cancelled,
}

impl BuildOutcomeLabel {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Registers all projection metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(CACHE_HITS, "Projection requests served from a stored artifact");
    describe_counter!(BUILDS, "Projection build attempts by kind and outcome");
    describe_counter!(PENDING, "Projection requests answered with build-in-progress");
    describe_counter!(STALE_TAKEOVERS, "Stale in-progress builds taken over");
    describe_histogram!(BUILD_DURATION, "Duration of projection builds in seconds");
}

/// Records a cache hit.
pub fn record_cache_hit(kind: OutputKind) {
    counter!(CACHE_HITS, "kind" => kind.as_str()).increment(1);
}

/// Records a pending response.
pub fn record_pending(kind: OutputKind) {
    counter!(PENDING, "kind" => kind.as_str()).increment(1);
}

/// Records a stale takeover.
pub fn record_stale_takeover(kind: OutputKind) {
    counter!(STALE_TAKEOVERS, "kind" => kind.as_str()).increment(1);
}

/// Records a finished build attempt.
pub fn record_build(kind: OutputKind, outcome: BuildOutcomeLabel, duration_secs: f64) {
    let labels = [("kind", kind.as_str()), ("outcome", outcome.as_str())];
    counter!(BUILDS, &labels).increment(1);
    histogram!(BUILD_DURATION, "kind" => kind.as_str()).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        register_metrics();
        record_cache_hit(OutputKind::Document);
        record_pending(OutputKind::Archive);
        record_stale_takeover(OutputKind::Manifest);
        record_build(OutputKind::Document, BuildOutcomeLabel::Success, 0.25);
    }
}
