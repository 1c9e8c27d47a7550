use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::Utc;
use serde::Serialize;

use crate::core::metrics::MetricSample;
use crate::error::{DashboardError, Result};

/// Rolling window of metric samples, bounded by age
///
/// Samples older than `max_age_secs` relative to the newest recorded sample
/// are evicted on every `record`. A single writer appends while any number
/// of readers query; both go through one `RwLock`, so a query that starts
/// after `record` returns always sees the new sample.
#[derive(Debug)]
pub struct MetricsHistory {
    samples: RwLock<VecDeque<MetricSample>>,
    max_age_secs: i64,
}

/// Wire shape of a history query result
#[derive(Debug, Clone, Serialize)]
pub struct HistoryWindow {
    pub history: Vec<MetricSample>,
}

impl MetricsHistory {
    pub fn new(max_age_secs: u64) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            max_age_secs: max_age_secs as i64,
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs as u64
    }

    /// Append a sample and evict anything past the retention age
    ///
    /// Samples are kept in timestamp order; a sample stamped earlier than
    /// the current tail (clock stepped backwards) is clamped to the tail's
    /// timestamp.
    pub fn record(&self, mut sample: MetricSample) {
        let mut samples = match self.samples.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(last) = samples.back() {
            if sample.timestamp < last.timestamp {
                sample.timestamp = last.timestamp;
            }
        }

        let cutoff = sample.timestamp - self.max_age_secs;
        samples.push_back(sample);

        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }
    }

    /// Samples from the last `last_n_seconds`, oldest first
    pub fn query(&self, last_n_seconds: i64) -> Result<Vec<MetricSample>> {
        self.query_at(last_n_seconds, Utc::now().timestamp())
    }

    /// Samples with `timestamp >= now - last_n_seconds`, oldest first
    pub fn query_at(&self, last_n_seconds: i64, now: i64) -> Result<Vec<MetricSample>> {
        if last_n_seconds <= 0 {
            return Err(DashboardError::InvalidArgument(format!(
                "last_n_seconds must be positive, got {}",
                last_n_seconds
            )));
        }

        let cutoff = now.saturating_sub(last_n_seconds);
        let samples = match self.samples.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Timestamps are non-decreasing, so everything after the first match
        // is inside the window as well
        let start = samples.partition_point(|s| s.timestamp < cutoff);
        Ok(samples.range(start..).copied().collect())
    }

    pub fn len(&self) -> usize {
        self.samples.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent sample, if any
    pub fn latest(&self) -> Option<MetricSample> {
        self.samples.read().ok().and_then(|s| s.back().copied())
    }
}
