//! Rolling per-operation latency figures.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: usize,
}

impl LatencyStats {
    fn from_samples<'a>(samples: impl Iterator<Item = &'a f64>) -> Self {
        let mut stats = Self {
            min_ms: f64::INFINITY,
            ..Self::default()
        };
        let mut total = 0.0;
        for &ms in samples {
            total += ms;
            stats.min_ms = stats.min_ms.min(ms);
            stats.max_ms = stats.max_ms.max(ms);
            stats.count += 1;
        }
        if stats.count == 0 {
            return Self::default();
        }
        stats.avg_ms = total / stats.count as f64;
        stats
    }
}

#[derive(Debug)]
pub struct LatencyMonitor {
    max_samples: usize,
    warn_threshold_ms: f64,
    samples: Mutex<HashMap<String, VecDeque<f64>>>,
}

impl LatencyMonitor {
    pub fn new(max_samples: usize, warn_threshold_ms: f64) -> Self {
        Self {
            max_samples: max_samples.max(1),
            warn_threshold_ms,
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, operation: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        if ms > self.warn_threshold_ms {
            warn!(operation, elapsed_ms = ms, threshold_ms = self.warn_threshold_ms, "slow operation");
        }
        let mut samples = self.samples.lock();
        let window = samples.entry(operation.to_string()).or_default();
        if window.len() == self.max_samples {
            window.pop_front();
        }
        window.push_back(ms);
    }

    /// Run `f` and record how long it took under `operation`.
    pub fn measure<T>(&self, operation: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(operation, start.elapsed());
        out
    }

    pub fn stats(&self, operation: &str) -> LatencyStats {
        self.samples
            .lock()
            .get(operation)
            .map(|w| LatencyStats::from_samples(w.iter()))
            .unwrap_or_default()
    }

    /// Figures across every operation.
    pub fn overall(&self) -> LatencyStats {
        let samples = self.samples.lock();
        LatencyStats::from_samples(samples.values().flat_map(|w| w.iter()))
    }

    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.samples.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new(100, 100.0)
    }
}
