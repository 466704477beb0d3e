//! Histograms for duration distributions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bucket bounds (seconds) for whole migration passes.
pub const MIGRATION_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// A fixed-bucket histogram.
///
/// `counts[i]` holds observations in `(bounds[i-1], bounds[i]]`; the last
/// slot holds everything above the highest bound.
#[derive(Debug)]
pub struct Histogram {
    name: &'static str,
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    // f64 bits
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(name: &'static str) -> Self {
        Self::with_bounds(name, MIGRATION_DURATION_BUCKETS.to_vec())
    }

    fn with_bounds(name: &'static str, mut bounds: Vec<f64>) -> Self {
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        let counts = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            name,
            bounds,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn observe(&self, value: f64) {
        let slot = self.bounds.partition_point(|&bound| bound < value);
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    /// Start a timer that records when dropped.
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            sum: f64::from_bits(self.sum.load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

/// Records elapsed time into a histogram on drop.
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl HistogramTimer<'_> {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe_duration(self.start.elapsed());
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Upper bound of the bucket containing the `p`th percentile.
    ///
    /// Observations above the highest bound report that bound.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        let target = ((self.count as f64 * p / 100.0).ceil() as u64).max(1);
        let mut seen = 0;
        for (slot, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                return self
                    .bounds
                    .get(slot)
                    .or(self.bounds.last())
                    .copied()
                    .unwrap_or(0.0);
            }
        }

        self.bounds.last().copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_places_values() {
        let histogram = Histogram::with_bounds("test", vec![1.0, 0.1, 10.0]);
        histogram.observe(0.05);
        histogram.observe(0.1);
        histogram.observe(5.0);
        histogram.observe(60.0);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.bounds, vec![0.1, 1.0, 10.0]);
        assert_eq!(snapshot.counts, vec![2, 0, 1, 1]);
        assert_eq!(snapshot.count, 4);
        assert!((snapshot.sum - 65.15).abs() < 1e-9);
    }

    #[test]
    fn test_percentile() {
        let histogram = Histogram::with_bounds("test", vec![0.1, 1.0, 10.0]);
        for _ in 0..9 {
            histogram.observe(0.05);
        }
        histogram.observe(5.0);

        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.percentile(50.0), 0.1);
        assert_eq!(snapshot.percentile(100.0), 10.0);
        assert_eq!(Histogram::new("empty").snapshot().percentile(99.0), 0.0);
    }

    #[test]
    fn test_timer_records_on_drop() {
        let histogram = Histogram::new("timer");
        {
            let timer = histogram.start_timer();
            assert!(timer.elapsed() < Duration::from_secs(5));
        }
        assert_eq!(histogram.snapshot().count, 1);
    }
}
