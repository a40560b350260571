//! Latency histograms and event counters for the feed pipeline.
//! Histograms keep a sliding window of the latest samples (microseconds).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Measures from creation until `finish`. Dropping it records nothing.
pub struct TimingSpan {
    name: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Records and returns the elapsed microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.started.elapsed().as_secs_f64() * 1_000_000.0;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

struct Window {
    samples: VecDeque<f64>,
    limit: usize,
}

impl Window {
    fn push(&mut self, value: f64) {
        if self.samples.len() == self.limit {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

/// Nearest-rank percentile over an ascending slice.
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n => {
            let idx = ((p / 100.0) * (n as f64 - 1.0)).round() as usize;
            sorted[idx.min(n - 1)]
        }
    }
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, Window>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    window: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(1024)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    pub fn record(&self, name: &'static str, value_us: f64) {
        self.histograms
            .lock()
            .entry(name)
            .or_insert_with(|| Window {
                samples: VecDeque::with_capacity(self.window),
                limit: self.window,
            })
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn incr(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_default() += 1;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Percentile (0-100) of a histogram, in microseconds. 0 when empty.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists
            .get(name)
            .map_or(0.0, |w| nearest_rank(&w.sorted(), p))
    }

    /// Samples currently in the window.
    pub fn count(&self, name: &str) -> usize {
        self.histograms.lock().get(name).map_or(0, |w| w.samples.len())
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, window)| {
                let sorted = window.sorted();
                let summary = MetricSummary {
                    p50_us: nearest_rank(&sorted, 50.0),
                    p95_us: nearest_rank(&sorted, 95.0),
                    p99_us: nearest_rank(&sorted, 99.0),
                    max_us: sorted.last().copied().unwrap_or(0.0),
                    count: sorted.len(),
                };
                (name.to_string(), summary)
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
    pub count: usize,
}

pub mod metric_names {
    pub const SOURCE_FETCH: &str = "t_source_fetch";
    pub const TRANSLATE: &str = "t_translate";
    pub const EXPLAIN: &str = "t_explain";
    pub const FIRST_REVEAL: &str = "t_first_reveal";
    pub const INITIAL_LOAD: &str = "t_initial_load";
    pub const LOAD_MORE: &str = "t_load_more";
    pub const LANGUAGE_SWITCH: &str = "t_language_switch";

    // counters
    pub const BREAKER_TRIPS: &str = "n_breaker_trips";
    pub const TRANSLATION_SKIPPED: &str = "n_translation_skipped";
    pub const EXPLAIN_LOCAL_FALLBACK: &str = "n_explain_local_fallback";
    pub const DEGRADED_SESSIONS: &str = "n_degraded_sessions";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::with_window(8);
        for v in [50.0, 10.0, 40.0, 20.0, 30.0] {
            registry.record(metric_names::SOURCE_FETCH, v);
        }
        assert_eq!(registry.percentile(metric_names::SOURCE_FETCH, 50.0), 30.0);
        assert_eq!(registry.percentile(metric_names::SOURCE_FETCH, 99.0), 50.0);
        assert_eq!(registry.percentile("missing", 50.0), 0.0);
    }

    #[test]
    fn window_keeps_only_latest_samples() {
        let registry = MetricsRegistry::with_window(2);
        for v in [1.0, 2.0, 3.0] {
            registry.record(metric_names::EXPLAIN, v);
        }
        let summary = registry.summary();
        let explain = &summary[metric_names::EXPLAIN];
        assert_eq!(explain.count, 2);
        assert_eq!(explain.p50_us, 3.0);
        assert_eq!(explain.max_us, 3.0);
    }

    #[test]
    fn counters_start_at_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.counter(metric_names::BREAKER_TRIPS), 0);
        registry.incr(metric_names::BREAKER_TRIPS);
        registry.incr(metric_names::BREAKER_TRIPS);
        assert_eq!(registry.counter(metric_names::BREAKER_TRIPS), 2);
    }

    #[test]
    fn dropped_span_records_nothing() {
        let registry = Arc::new(MetricsRegistry::new());
        drop(registry.span(metric_names::TRANSLATE));
        assert_eq!(registry.count(metric_names::TRANSLATE), 0);
        registry.span(metric_names::TRANSLATE).finish();
        assert_eq!(registry.count(metric_names::TRANSLATE), 1);
    }
}
