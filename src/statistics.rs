use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_WINDOW: usize = 1000;

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Value at quantile `p` (0.0..=1.0) of the current window
    pub fn percentile(&self, p: f64) -> Duration {
        let measurements = self.measurements.lock();
        if measurements.is_empty() {
            return Duration::ZERO;
        }

        let mut sorted: Vec<_> = measurements.iter().copied().collect();
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        Duration::from_nanos(sorted[idx.min(sorted.len() - 1)])
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

#[derive(Debug, Default)]
struct Summary {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

/// Accumulates count, total, min and max of a duration series.
///
/// Clones share the same underlying counters.
#[derive(Debug, Clone)]
pub struct StatisticsKeeper {
    name: Arc<str>,
    summary: Arc<Mutex<Summary>>,
    latency_tracker: PercentileTracker,
}

impl StatisticsKeeper {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            summary: Arc::new(Mutex::new(Summary::default())),
            latency_tracker: PercentileTracker::new(DEFAULT_WINDOW),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, value: Duration) {
        {
            let mut summary = self.summary.lock();
            summary.count += 1;
            summary.total += value;
            summary.min = Some(summary.min.map_or(value, |m| m.min(value)));
            summary.max = Some(summary.max.map_or(value, |m| m.max(value)));
        }
        self.latency_tracker
            .record(u64::try_from(value.as_nanos()).unwrap_or(u64::MAX));
    }

    pub fn count(&self) -> u64 {
        self.summary.lock().count
    }

    pub fn total(&self) -> Duration {
        self.summary.lock().total
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let (count, total, min, max) = {
            let summary = self.summary.lock();
            (summary.count, summary.total, summary.min, summary.max)
        };
        let mean = if count == 0 {
            Duration::ZERO
        } else {
            total / u32::try_from(count).unwrap_or(u32::MAX)
        };
        StatisticsSnapshot {
            name: self.name.to_string(),
            count,
            total,
            min: min.unwrap_or_default(),
            max: max.unwrap_or_default(),
            mean,
            p50: self.latency_tracker.percentile(0.50),
            p95: self.latency_tracker.percentile(0.95),
            p99: self.latency_tracker.percentile(0.99),
        }
    }
}

/// A snapshot of a [`StatisticsKeeper`] at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub name: String,
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl StatisticsSnapshot {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "{}: count {}, total {:.2}ms, min {:.2}ms, max {:.2}ms, mean {:.2}ms, \
             P50 {:.2}ms, P95 {:.2}ms, P99 {:.2}ms",
            self.name,
            self.count,
            millis(self.total),
            millis(self.min),
            millis(self.max),
            millis(self.mean),
            millis(self.p50),
            millis(self.p95),
            millis(self.p99),
        )
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
