//! Per-command latency instrumentation for the matching loop.
//!
//! The matching thread records each command's handling time in
//! nanoseconds; readers pull quantiles out of band. Recording stays off
//! any lock - the histogram lives with the matching thread and a
//! snapshot is exported on demand.

use hdrhistogram::Histogram;

/// Nanosecond histogram of per-command handling time.
pub struct LatencyRecorder {
    histogram: Histogram<u64>,
}

impl LatencyRecorder {
    /// Three significant figures, 1ns..1s range.
    pub fn new() -> Self {
        Self {
            histogram: Histogram::new_with_bounds(1, 1_000_000_000, 3)
                .expect("static histogram bounds"),
        }
    }

    /// Record one handling duration. Out-of-range outliers are
    /// saturated rather than dropped.
    #[inline]
    pub fn record(&mut self, nanos: u64) {
        self.histogram.saturating_record(nanos.max(1));
    }

    /// Immutable quantile snapshot.
    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.histogram.len(),
            min: self.histogram.min(),
            p50: self.histogram.value_at_quantile(0.50),
            p90: self.histogram.value_at_quantile(0.90),
            p99: self.histogram.value_at_quantile(0.99),
            max: self.histogram.max(),
        }
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time latency quantiles, all in nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub min: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recorder_snapshot() {
        let rec = LatencyRecorder::new();
        let snap = rec.snapshot();
        assert_eq!(snap.count, 0);
    }

    #[test]
    fn quantiles_are_ordered() {
        let mut rec = LatencyRecorder::new();
        for n in 1..=1000u64 {
            rec.record(n * 100);
        }
        let snap = rec.snapshot();
        assert_eq!(snap.count, 1000);
        assert!(snap.min <= snap.p50);
        assert!(snap.p50 <= snap.p90);
        assert!(snap.p90 <= snap.p99);
        assert!(snap.p99 <= snap.max);
    }

    #[test]
    fn zero_duration_is_clamped_not_lost() {
        let mut rec = LatencyRecorder::new();
        rec.record(0);
        assert_eq!(rec.snapshot().count, 1);
    }
}
