//! Success/failure telemetry.
//!
//! Every call is reported under [`Dimensions`]; the interface name is
//! `ACTIVE_<method>_<path>` (ACTIVE marks the calling side).

use crate::error::{InvokeError, Result};
use parking_lot::Mutex;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Label set attached to one report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimensions {
    /// Identity of this process.
    pub caller: String,
    /// Target service name.
    pub target: String,
    /// Resolved `host:port` (empty if resolution failed).
    pub endpoint: String,
    /// `ACTIVE_<method>_<path>`.
    pub interface: String,
}

impl Dimensions {
    pub fn interface_name(method: &str, path: &str) -> String {
        format!("ACTIVE_{}_{}", method, path)
    }

    fn labels(&self) -> [&str; 4] {
        [&self.caller, &self.target, &self.endpoint, &self.interface]
    }

    fn labels_with<'a>(&'a self, extra: &'a str) -> [&'a str; 5] {
        [&self.caller, &self.target, &self.endpoint, &self.interface, extra]
    }
}

/// Telemetry sink.
pub trait Reporter: Send + Sync {
    fn success(&self, dimensions: &Dimensions, elapsed: Duration);

    /// `code` is the HTTP status when known, otherwise `-1`.
    fn failure(&self, dimensions: &Dimensions, code: i64, elapsed: Duration);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn success(&self, _: &Dimensions, _: Duration) {}
    fn failure(&self, _: &Dimensions, _: i64, _: Duration) {}
}

/// Prometheus counters and latency histograms.
#[derive(Clone)]
pub struct PrometheusReporter {
    success: IntCounterVec,
    failure: IntCounterVec,
    latency: HistogramVec,
}

impl PrometheusReporter {
    /// Create the metric families and register them on `registry`.
    pub fn new(registry: &Registry) -> std::result::Result<Self, prometheus::Error> {
        let success = IntCounterVec::new(
            Opts::new("invoke_success_total", "Successful outbound invocations"),
            &["caller", "target", "endpoint", "interface"],
        )?;
        let failure = IntCounterVec::new(
            Opts::new("invoke_failure_total", "Failed outbound invocations"),
            &["caller", "target", "endpoint", "interface", "code"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("invoke_latency_seconds", "Outbound invocation latency"),
            &["caller", "target", "endpoint", "interface", "outcome"],
        )?;

        registry.register(Box::new(success.clone()))?;
        registry.register(Box::new(failure.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            success,
            failure,
            latency,
        })
    }

    /// Successful calls recorded for `dimensions`.
    pub fn success_count(&self, d: &Dimensions) -> u64 {
        self.success.with_label_values(&d.labels()).get()
    }

    /// Failed calls recorded for `dimensions` with `code`.
    pub fn failure_count(&self, d: &Dimensions, code: i64) -> u64 {
        let code = code.to_string();
        self.failure.with_label_values(&d.labels_with(&code)).get()
    }
}

impl Reporter for PrometheusReporter {
    fn success(&self, d: &Dimensions, elapsed: Duration) {
        self.success.with_label_values(&d.labels()).inc();
        self.latency
            .with_label_values(&d.labels_with("success"))
            .observe(elapsed.as_secs_f64());
    }

    fn failure(&self, d: &Dimensions, code: i64, elapsed: Duration) {
        let code = code.to_string();
        self.failure.with_label_values(&d.labels_with(&code)).inc();
        self.latency
            .with_label_values(&d.labels_with("failure"))
            .observe(elapsed.as_secs_f64());
    }
}

/// One recorded report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Success(Dimensions),
    Failure(Dimensions, i64),
}

/// Keeps reports in memory (for testing/development).
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    events: Arc<Mutex<Vec<ReportEvent>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }
}

impl Reporter for MemoryReporter {
    fn success(&self, d: &Dimensions, _: Duration) {
        self.events.lock().push(ReportEvent::Success(d.clone()));
    }

    fn failure(&self, d: &Dimensions, code: i64, _: Duration) {
        self.events.lock().push(ReportEvent::Failure(d.clone(), code));
    }
}

/// What a deferred stage needs to report a call it did not execute.
#[must_use = "a report context reports nothing until finished"]
#[derive(Clone)]
pub struct ReportContext {
    dimensions: Dimensions,
    started: Instant,
    reporter: Option<Arc<dyn Reporter>>,
}

impl ReportContext {
    pub(crate) fn new(
        dimensions: Dimensions,
        started: Instant,
        reporter: Option<Arc<dyn Reporter>>,
    ) -> Self {
        Self {
            dimensions,
            started,
            reporter,
        }
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Report `outcome` through the configured reporter, if any.
    pub fn finish<T>(self, outcome: &Result<T>) {
        self.finish_with(outcome.as_ref().err());
    }

    pub(crate) fn finish_with(self, error: Option<&InvokeError>) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        let elapsed = self.started.elapsed();
        match error {
            None => reporter.success(&self.dimensions, elapsed),
            Some(e) => reporter.failure(&self.dimensions, e.report_code(), elapsed),
        }
    }
}

impl std::fmt::Debug for ReportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportContext")
            .field("dimensions", &self.dimensions)
            .field("started", &self.started)
            .field("enabled", &self.reporter.is_some())
            .finish()
    }
}
