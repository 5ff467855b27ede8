use crate::config::Variant;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of latency samples retained per variant.
pub const LATENCY_HISTORY_CAPACITY: usize = 1000;

#[derive(Default)]
struct VariantStats {
    requests: u64,
    errors: u64,
    /// Most recent round-trip durations in seconds, oldest first
    latencies: VecDeque<f64>,
}

impl VariantStats {
    fn push_latency(&mut self, seconds: f64) {
        self.latencies.push_back(seconds);
        while self.latencies.len() > LATENCY_HISTORY_CAPACITY {
            self.latencies.pop_front();
        }
    }

    fn avg_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
    }
}

#[derive(Default)]
struct Counters {
    total: u64,
    errors: u64,
    variant_a: VariantStats,
    variant_b: VariantStats,
}

impl Counters {
    fn variant_mut(&mut self, variant: Variant) -> &mut VariantStats {
        match variant {
            Variant::VariantA => &mut self.variant_a,
            Variant::VariantB => &mut self.variant_b,
        }
    }

    #[cfg(test)]
    fn variant(&self, variant: Variant) -> &VariantStats {
        match variant {
            Variant::VariantA => &self.variant_a,
            Variant::VariantB => &self.variant_b,
        }
    }
}

/// Point-in-time view of the collected metrics, with derived values
/// computed when the snapshot is taken.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MetricsView {
    pub total_requests: u64,
    pub variant_a_requests: u64,
    pub variant_b_requests: u64,
    pub errors: u64,
    pub variant_a_errors: u64,
    pub variant_b_errors: u64,
    pub variant_a_percentage: f64,
    pub variant_b_percentage: f64,
    pub variant_a_avg_latency: f64,
    pub variant_b_avg_latency: f64,
    #[cfg(test)]
    #[serde(skip)]
    pub variant_a_samples: usize,
    #[cfg(test)]
    #[serde(skip)]
    pub variant_b_samples: usize,
}

/// Request counters and bounded latency history per variant.
///
/// Every mutation, snapshot and reset goes through the same lock, so a reset
/// is ordered before or after each concurrent update, never in between.
#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a completed forward and appends its latency, trimming the
    /// history to [`LATENCY_HISTORY_CAPACITY`] in the same critical section.
    pub fn record_success(&self, variant: Variant, latency: Duration) {
        let mut counters = self.inner.lock();
        counters.total += 1;
        let stats = counters.variant_mut(variant);
        stats.requests += 1;
        stats.push_latency(latency.as_secs_f64());
    }

    /// Counts a forward that never got a response from `variant`.
    pub fn record_error(&self, variant: Variant) {
        let mut counters = self.inner.lock();
        counters.errors += 1;
        counters.variant_mut(variant).errors += 1;
    }

    pub fn snapshot(&self) -> MetricsView {
        let counters = self.inner.lock();
        let percentage = |requests: u64| {
            if counters.total == 0 {
                0.0
            } else {
                requests as f64 / counters.total as f64 * 100.0
            }
        };

        MetricsView {
            total_requests: counters.total,
            variant_a_requests: counters.variant_a.requests,
            variant_b_requests: counters.variant_b.requests,
            errors: counters.errors,
            variant_a_errors: counters.variant_a.errors,
            variant_b_errors: counters.variant_b.errors,
            variant_a_percentage: percentage(counters.variant_a.requests),
            variant_b_percentage: percentage(counters.variant_b.requests),
            variant_a_avg_latency: counters.variant_a.avg_latency(),
            variant_b_avg_latency: counters.variant_b.avg_latency(),
            #[cfg(test)]
            variant_a_samples: counters.variant_a.latencies.len(),
            #[cfg(test)]
            variant_b_samples: counters.variant_b.latencies.len(),
        }
    }

    /// Retained latency samples for `variant`, oldest first.
    #[cfg(test)]
    pub fn latency_history(&self, variant: Variant) -> Vec<f64> {
        self.inner
            .lock()
            .variant(variant)
            .latencies
            .iter()
            .copied()
            .collect()
    }

    pub fn reset(&self) {
        *self.inner.lock() = Counters::default();
        tracing::info!("Metrics reset");
    }
}
