//! Live performance monitoring for integrated features.
//!
//! The monitor samples a fixed set of signals on a timer, keeps a bounded
//! window of samples with running averages, and raises
//! [`PerformanceAlert`]s when a sample crosses a threshold. Alerts feed
//! trigger evaluation; the monitor never mutates job or rollback state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rollback::{SignalSource, TriggerSignals};

/// One point-in-time sample of the live signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Average response time over the sampling period.
    pub response_time_ms: f64,
    /// Fraction of requests failing, 0.0 to 1.0.
    pub error_rate: f64,
    /// Requests served per second.
    pub throughput_rps: f64,
    /// Resident memory.
    pub memory_mb: f64,
    /// CPU utilization, 0 to 100.
    pub cpu_pct: f64,
}

impl PerformanceSample {
    /// A sample taken now.
    #[must_use]
    pub fn now(
        response_time_ms: f64,
        error_rate: f64,
        throughput_rps: f64,
        memory_mb: f64,
        cpu_pct: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            response_time_ms,
            error_rate,
            throughput_rps,
            memory_mb,
            cpu_pct,
        }
    }
}

/// Which signal an alert concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Response time.
    ResponseTime,
    /// Error rate.
    ErrorRate,
    /// Resident memory.
    Memory,
    /// CPU utilization.
    Cpu,
}

/// A threshold crossing observed by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    /// The signal that crossed its threshold.
    pub signal: SignalKind,
    /// The observed value.
    pub value: f64,
    /// The configured threshold.
    pub threshold: f64,
    /// When the crossing was observed.
    pub raised_at: DateTime<Utc>,
}

impl PerformanceAlert {
    /// Human-readable summary for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{:?} at {:.2} crossed threshold {:.2}",
            self.signal, self.value, self.threshold
        )
    }
}

/// Alerting thresholds per signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    /// Response-time ceiling.
    pub response_time_ms: f64,
    /// Error-rate ceiling, 0.0 to 1.0.
    pub error_rate: f64,
    /// Memory ceiling.
    pub memory_mb: f64,
    /// CPU ceiling, 0 to 100.
    pub cpu_pct: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time_ms: 200.0,
            error_rate: 0.05,
            memory_mb: 512.0,
            cpu_pct: 90.0,
        }
    }
}

/// Running averages over the sample window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAverages {
    /// Mean response time across the window.
    pub response_time_ms: f64,
    /// Mean error rate across the window.
    pub error_rate: f64,
    /// Mean throughput across the window.
    pub throughput_rps: f64,
    /// Mean memory across the window.
    pub memory_mb: f64,
    /// Mean CPU across the window.
    pub cpu_pct: f64,
}

/// Bounded-window monitor over the live signals.
#[derive(Debug)]
pub struct PerformanceMonitor {
    window: VecDeque<PerformanceSample>,
    capacity: usize,
    thresholds: AlertThresholds,
    baseline_response_time_ms: f64,
    alerts: Vec<PerformanceAlert>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    /// Default bounded window size.
    pub const DEFAULT_WINDOW: usize = 60;

    /// Creates a monitor with default thresholds and window size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(Self::DEFAULT_WINDOW),
            capacity: Self::DEFAULT_WINDOW,
            thresholds: AlertThresholds::default(),
            baseline_response_time_ms: 0.0,
            alerts: Vec::new(),
        }
    }

    /// Overrides the window size.
    #[must_use]
    pub fn with_window(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Overrides the thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Sets the pre-integration response-time baseline.
    #[must_use]
    pub const fn with_baseline_response_time(mut self, baseline_ms: f64) -> Self {
        self.baseline_response_time_ms = baseline_ms;
        self
    }

    /// Records a sample, evicting the oldest when the window is full.
    ///
    /// Returns the alerts this sample raised, which are also retained on
    /// the monitor.
    pub fn record(&mut self, sample: PerformanceSample) -> Vec<PerformanceAlert> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let mut raised = Vec::new();
        let mut check = |signal, value, threshold| {
            if value > threshold {
                raised.push(PerformanceAlert {
                    signal,
                    value,
                    threshold,
                    raised_at: sample.timestamp,
                });
            }
        };
        check(
            SignalKind::ResponseTime,
            sample.response_time_ms,
            self.thresholds.response_time_ms,
        );
        check(SignalKind::ErrorRate, sample.error_rate, self.thresholds.error_rate);
        check(SignalKind::Memory, sample.memory_mb, self.thresholds.memory_mb);
        check(SignalKind::Cpu, sample.cpu_pct, self.thresholds.cpu_pct);

        for alert in &raised {
            metrics::counter!("splice_performance_alerts_total").increment(1);
            tracing::warn!(signal = ?alert.signal, value = alert.value, "performance alert");
        }
        self.alerts.extend(raised.iter().cloned());
        raised
    }

    /// Running averages over the current window. Zero when empty.
    #[must_use]
    pub fn averages(&self) -> RunningAverages {
        if self.window.is_empty() {
            return RunningAverages::default();
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.window.len() as f64;
        let mut sums = RunningAverages::default();
        for sample in &self.window {
            sums.response_time_ms += sample.response_time_ms;
            sums.error_rate += sample.error_rate;
            sums.throughput_rps += sample.throughput_rps;
            sums.memory_mb += sample.memory_mb;
            sums.cpu_pct += sample.cpu_pct;
        }
        RunningAverages {
            response_time_ms: sums.response_time_ms / n,
            error_rate: sums.error_rate / n,
            throughput_rps: sums.throughput_rps / n,
            memory_mb: sums.memory_mb / n,
            cpu_pct: sums.cpu_pct / n,
        }
    }

    /// All alerts raised so far, in order.
    #[must_use]
    pub fn alerts(&self) -> &[PerformanceAlert] {
        &self.alerts
    }

    /// Number of samples currently in the window.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Current signals for trigger evaluation.
    #[must_use]
    pub fn signals(&self) -> TriggerSignals {
        let averages = self.averages();
        TriggerSignals {
            error_rate: averages.error_rate,
            response_time_ms: averages.response_time_ms,
            baseline_response_time_ms: self.baseline_response_time_ms,
        }
    }
}

/// Produces samples for the monitor's timer loop.
#[async_trait]
pub trait SampleProbe: Send + Sync {
    /// Takes one sample.
    async fn probe(&self) -> PerformanceSample;
}

/// Shareable monitor handle: the sampling loop writes, trigger evaluation
/// reads.
#[derive(Debug, Clone)]
pub struct SharedMonitor {
    inner: Arc<Mutex<PerformanceMonitor>>,
}

impl Default for SharedMonitor {
    fn default() -> Self {
        Self::new(PerformanceMonitor::new())
    }
}

impl SharedMonitor {
    /// Wraps a monitor for sharing.
    #[must_use]
    pub fn new(monitor: PerformanceMonitor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(monitor)),
        }
    }

    /// Records a sample. Poisoned locks drop the sample.
    pub fn record(&self, sample: PerformanceSample) -> Vec<PerformanceAlert> {
        self.inner
            .lock()
            .map(|mut monitor| monitor.record(sample))
            .unwrap_or_default()
    }

    /// Running averages over the current window.
    #[must_use]
    pub fn averages(&self) -> RunningAverages {
        self.inner
            .lock()
            .map(|monitor| monitor.averages())
            .unwrap_or_default()
    }

    /// All alerts raised so far.
    #[must_use]
    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.inner
            .lock()
            .map(|monitor| monitor.alerts().to_vec())
            .unwrap_or_default()
    }

    /// Runs the sampling loop until the returned future is dropped.
    pub async fn run(&self, probe: Arc<dyn SampleProbe>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let sample = probe.probe().await;
            self.record(sample);
        }
    }
}

#[async_trait]
impl SignalSource for SharedMonitor {
    async fn sample(&self) -> TriggerSignals {
        self.inner
            .lock()
            .map(|monitor| monitor.signals())
            .unwrap_or_default()
    }
}
