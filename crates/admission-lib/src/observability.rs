//! Observability infrastructure for admission control
//!
//! Provides:
//! - Prometheus metrics (host usage gauges, admission outcomes, reservation
//!   totals, collection and observer errors, sampling latency)
//! - Structured logging of admission events with tracing

use crate::models::{DecisionOutcome, ResourceUsage, ReservedTotals, SchedulingDecision};
use crate::monitor::UsageObserver;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sampling latency (in seconds). CPU measurement
/// alone waits ~200ms, so the range is wider than a pure read would need.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdmissionMetricsInner> = OnceLock::new();

struct AdmissionMetricsInner {
    cpu_percent: Gauge,
    memory_percent: Gauge,
    memory_available_mb: Gauge,
    load_average_1m: Gauge,
    pressure_level: IntGauge,
    active_reservations: IntGauge,
    reserved_cpu_percent: Gauge,
    reserved_memory_mb: Gauge,
    decisions: IntCounterVec,
    collection_errors: IntCounter,
    observer_errors: IntCounter,
    sample_latency_seconds: Histogram,
}

impl AdmissionMetricsInner {
    fn new() -> Self {
        Self {
            cpu_percent: register_gauge!(
                "admission_host_cpu_percent",
                "Host CPU utilization at the last sample"
            )
            .expect("Failed to register cpu_percent"),

            memory_percent: register_gauge!(
                "admission_host_memory_percent",
                "Host memory utilization at the last sample"
            )
            .expect("Failed to register memory_percent"),

            memory_available_mb: register_gauge!(
                "admission_host_memory_available_mb",
                "Memory available for new work at the last sample"
            )
            .expect("Failed to register memory_available_mb"),

            load_average_1m: register_gauge!(
                "admission_host_load_average_1m",
                "One-minute load average at the last sample"
            )
            .expect("Failed to register load_average_1m"),

            pressure_level: register_int_gauge!(
                "admission_pressure_level",
                "Overall resource pressure (0=low, 1=moderate, 2=high, 3=critical)"
            )
            .expect("Failed to register pressure_level"),

            active_reservations: register_int_gauge!(
                "admission_active_reservations",
                "Number of unexpired resource reservations"
            )
            .expect("Failed to register active_reservations"),

            reserved_cpu_percent: register_gauge!(
                "admission_reserved_cpu_percent",
                "CPU percent held by active reservations"
            )
            .expect("Failed to register reserved_cpu_percent"),

            reserved_memory_mb: register_gauge!(
                "admission_reserved_memory_mb",
                "Memory held by active reservations"
            )
            .expect("Failed to register reserved_memory_mb"),

            decisions: register_int_counter_vec!(
                "admission_decisions_total",
                "Admission decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register decisions"),

            collection_errors: register_int_counter!(
                "admission_collection_errors_total",
                "Telemetry collections answered with the fallback snapshot"
            )
            .expect("Failed to register collection_errors"),

            observer_errors: register_int_counter!(
                "admission_observer_errors_total",
                "Usage observers that returned an error or panicked"
            )
            .expect("Failed to register observer_errors"),

            sample_latency_seconds: register_histogram!(
                "admission_sample_latency_seconds",
                "Time spent taking one usage snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),
        }
    }
}

/// Admission metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionMetrics {
    inner: &'static AdmissionMetricsInner,
}

impl std::fmt::Debug for AdmissionMetricsInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionMetricsInner").finish_non_exhaustive()
    }
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    /// Get a handle, registering the metrics on first use
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(AdmissionMetricsInner::new),
        }
    }

    /// Update the host gauges from a snapshot
    pub fn record_usage(&self, usage: &ResourceUsage) {
        self.inner.cpu_percent.set(usage.cpu_percent);
        self.inner.memory_percent.set(usage.memory_percent);
        self.inner.memory_available_mb.set(usage.memory_available_mb);
        self.inner.load_average_1m.set(usage.load_average_1m);
        self.inner
            .pressure_level
            .set(usage.overall_pressure().level());
    }

    pub fn record_decision(&self, outcome: DecisionOutcome) {
        self.inner
            .decisions
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn decisions_total(&self, outcome: DecisionOutcome) -> u64 {
        self.inner
            .decisions
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn set_reservations(&self, totals: &ReservedTotals) {
        self.inner.active_reservations.set(totals.count as i64);
        self.inner.reserved_cpu_percent.set(totals.cpu_percent);
        self.inner.reserved_memory_mb.set(totals.memory_mb);
    }

    pub fn observe_sample_latency(&self, duration_secs: f64) {
        self.inner.sample_latency_seconds.observe(duration_secs);
    }

    pub fn inc_collection_errors(&self) {
        self.inner.collection_errors.inc();
    }

    pub fn collection_errors_total(&self) -> u64 {
        self.inner.collection_errors.get()
    }

    pub fn inc_observer_errors(&self) {
        self.inner.observer_errors.inc();
    }

    pub fn observer_errors_total(&self) -> u64 {
        self.inner.observer_errors.get()
    }
}

/// Keeps the host gauges current when registered on the monitor
impl UsageObserver for AdmissionMetrics {
    fn on_sample(&self, usage: &ResourceUsage) -> anyhow::Result<()> {
        self.record_usage(usage);
        Ok(())
    }

    fn name(&self) -> &str {
        "prometheus"
    }
}

/// Structured logger for admission events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log an admission verdict. Rejections are warnings.
    pub fn log_admission_decision(
        &self,
        task_id: &str,
        priority: u8,
        decision: &SchedulingDecision,
    ) {
        let outcome = decision.outcome();
        let pressure = decision.current_usage.overall_pressure();

        match outcome {
            DecisionOutcome::Rejected => {
                warn!(
                    event = "admission_decision",
                    node = %self.node_name,
                    task_id = %task_id,
                    priority = priority,
                    outcome = outcome.as_str(),
                    pressure = pressure.as_str(),
                    delay_secs = ?decision.recommended_delay_seconds,
                    reason = %decision.reason,
                    "Task rejected"
                );
            }
            _ => {
                info!(
                    event = "admission_decision",
                    node = %self.node_name,
                    task_id = %task_id,
                    priority = priority,
                    outcome = outcome.as_str(),
                    pressure = pressure.as_str(),
                    throttle_factor = ?decision.throttle_factor,
                    reason = %decision.reason,
                    "Task admitted"
                );
            }
        }
    }

    pub fn log_concurrency_recommendation(
        &self,
        task_cpu_estimate: f64,
        task_memory_estimate_mb: f64,
        recommended: usize,
    ) {
        info!(
            event = "concurrency_recommended",
            node = %self.node_name,
            task_cpu_estimate = task_cpu_estimate,
            task_memory_estimate_mb = task_memory_estimate_mb,
            recommended = recommended,
            "Recommended worker concurrency"
        );
    }

    pub fn log_startup(&self, version: &str, collector: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            collector = %collector,
            "Admission agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Admission agent shutting down"
        );
    }
}
