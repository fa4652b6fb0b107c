//! Sliding-window latency estimator shared by the prop and host streams.

use std::{collections::VecDeque, time::Duration};

use time::OffsetDateTime;

/// Aggregate over the current latency window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    /// Mean of the samples in the window.
    pub average: Duration,
    /// Smallest sample in the window.
    pub min: Duration,
    /// Largest sample in the window.
    pub max: Duration,
    /// Window occupancy.
    pub count: usize,
}

/// Fixed-size window of one-way latencies for a single stream.
///
/// Nothing is published until the window has filled once; from then on every
/// observation yields a fresh aggregate.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    window: VecDeque<Duration>,
    capacity: usize,
    since_publish: usize,
    primed: bool,
}

impl LatencyEstimator {
    /// Create an estimator holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            since_publish: 0,
            primed: false,
        }
    }

    /// Record a sample and return the aggregate when one is due.
    pub fn observe(&mut self, sample: Duration) -> Option<LatencyStats> {
        self.window.push_back(sample);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }

        if !self.primed {
            self.since_publish += 1;
            if self.since_publish < self.capacity {
                return None;
            }
            self.primed = true;
            self.since_publish = 0;
        }

        self.aggregate()
    }

    /// Drop every sample and require a full window again before publishing.
    pub fn reset(&mut self) {
        self.window.clear();
        self.since_publish = 0;
        self.primed = false;
    }

    fn aggregate(&self) -> Option<LatencyStats> {
        let min = *self.window.iter().min()?;
        let max = *self.window.iter().max()?;
        let total: Duration = self.window.iter().sum();
        let count = self.window.len();
        Some(LatencyStats {
            average: total / count as u32,
            min,
            max,
            count,
        })
    }
}

/// One-way latency between a source instant and its receipt, clamped at zero.
pub fn observed_latency(received_at: OffsetDateTime, source: OffsetDateTime) -> Duration {
    Duration::try_from(received_at - source).unwrap_or(Duration::ZERO)
}
