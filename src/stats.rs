//! Router-wide counters and the write-latency ring buffer behind
//! `GET /api/stats` (SPEC_FULL §A.6).
//!
//! The ring buffer is a bounded, oldest-dropped structure in the same
//! spirit as the outbound queues and the traffic log's bounded channel
//! (spec §5): a fixed memory footprint regardless of how long the router
//! has been running.

use std::collections::VecDeque;
use std::time::Duration;

/// Capacity of the write-latency sample ring per session.
pub const LATENCY_RING_CAPACITY: usize = 256;

/// Fixed-capacity, oldest-dropped ring of recent write-latency samples.
#[derive(Debug, Clone, Default)]
pub struct LatencyRing {
    samples: VecDeque<f64>,
}

impl LatencyRing {
    /// Record one write-latency sample, in milliseconds.
    pub fn push(&mut self, sample: Duration) {
        if self.samples.len() == LATENCY_RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.as_secs_f64() * 1000.0);
    }

    /// `(min, max, mean, median, stdev)` over the current window, or
    /// `None` if no samples have been recorded yet.
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len();
        let min = sorted[0];
        let max = sorted[n - 1];
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let variance = sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        let stdev = variance.sqrt();

        Some(LatencySummary {
            min_ms: min,
            max_ms: max,
            mean_ms: mean,
            median_ms: median,
            stdev_ms: stdev,
            samples: n,
        })
    }
}

/// Summary statistics over a [`LatencyRing`]'s current window.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LatencySummary {
    /// Minimum write latency observed, in milliseconds.
    pub min_ms: f64,
    /// Maximum write latency observed, in milliseconds.
    pub max_ms: f64,
    /// Mean write latency, in milliseconds.
    pub mean_ms: f64,
    /// Median write latency, in milliseconds.
    pub median_ms: f64,
    /// Standard deviation of write latency, in milliseconds.
    pub stdev_ms: f64,
    /// Number of samples the summary was computed over.
    pub samples: usize,
}

/// Router-wide counters surfaced via `/api/stats` and the status display.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    /// Total lines received from clients.
    pub lines_in: u64,
    /// Total lines sent to clients.
    pub lines_out: u64,
    /// Total bytes received from clients.
    pub bytes_in: u64,
    /// Total bytes sent to clients.
    pub bytes_out: u64,
    /// Lines dropped by the elevation filter.
    pub filtered_elevation: u64,
    /// Lines dropped by the traffic filter.
    pub filtered_traffic: u64,
    /// Lines dropped by the flight-control lock.
    pub filtered_flight_controls: u64,
    /// Observer writes silently dropped (spec §4.3).
    pub observer_writes_dropped: u64,
    /// Traffic-log entries dropped because the writer's queue was full
    /// (spec §5: "logging must never stall forwarding").
    pub traffic_log_dropped: u64,
    /// Write-latency samples, global (not per-session).
    pub write_latency: LatencyRing,
}
