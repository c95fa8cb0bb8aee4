//! Phase timing monitors
//!
//! A [`Monitor`] accumulates wall time and call counts for one named
//! operation. [`Monitor::copy`] derives an independent counter that reports to
//! the same metrics sink, so a caller can time several phases separately.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::metrics::ScenarioMetrics;

#[derive(Debug, Default)]
struct Counters {
    elapsed: Duration,
    calls: u64,
    flushed_elapsed: Duration,
    flushed_calls: u64,
}

/// Accumulating timer for a named operation
#[derive(Clone)]
pub struct Monitor {
    operation: String,
    counters: Arc<Mutex<Counters>>,
    metrics: Option<Arc<ScenarioMetrics>>,
}

impl Monitor {
    /// Create a monitor that only logs on flush
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            counters: Arc::new(Mutex::new(Counters::default())),
            metrics: None,
        }
    }

    /// Create a monitor that also reports to a metrics registry
    pub fn with_metrics(operation: impl Into<String>, metrics: Arc<ScenarioMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(operation)
        }
    }

    /// Independent monitor for another operation, sharing the metrics sink
    pub fn copy(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            counters: Arc::new(Mutex::new(Counters::default())),
            metrics: self.metrics.clone(),
        }
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Metrics sink, if any
    pub fn metrics(&self) -> Option<&Arc<ScenarioMetrics>> {
        self.metrics.as_ref()
    }

    /// Start timing; the elapsed time is added when the guard drops
    pub fn start(&self) -> MonitorGuard<'_> {
        MonitorGuard {
            monitor: self,
            started: Instant::now(),
        }
    }

    /// Time a closure
    pub fn measure<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.start();
        f()
    }

    /// Total time accumulated so far
    pub fn elapsed(&self) -> Duration {
        self.counters.lock().elapsed
    }

    /// Number of measured sections so far
    pub fn calls(&self) -> u64 {
        self.counters.lock().calls
    }

    /// Report what was accumulated since the previous flush
    pub fn flush(&self) {
        let (elapsed, calls) = {
            let mut c = self.counters.lock();
            let elapsed = c.elapsed.saturating_sub(c.flushed_elapsed);
            let calls = c.calls - c.flushed_calls;
            c.flushed_elapsed = c.elapsed;
            c.flushed_calls = c.calls;
            (elapsed, calls)
        };

        if calls == 0 {
            return;
        }

        debug!(
            operation = %self.operation,
            seconds = elapsed.as_secs_f64(),
            calls = calls,
            "Monitor flushed"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_phase(&self.operation, elapsed, calls);
        }
    }

    fn record(&self, elapsed: Duration) {
        let mut c = self.counters.lock();
        c.elapsed += elapsed;
        c.calls += 1;
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("operation", &self.operation)
            .field("elapsed", &self.elapsed())
            .field("calls", &self.calls())
            .finish()
    }
}

/// Guard returned by [`Monitor::start`]
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    started: Instant,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.monitor.record(self.started.elapsed());
    }
}
