//! Resource monitor and admission gate
//!
//! The monitor owns a background sampling loop, a bounded usage history,
//! the advisory reservation table and the admission policy. Admission
//! calls always read a fresh telemetry sample rather than the cached
//! history; only the reservation sweep takes the state lock.
//!
//! There is no atomic check-and-reserve: two concurrent
//! `can_schedule_task` calls may both see the same reservation state and
//! both accept. Callers should reserve immediately after a positive
//! verdict to keep that window small.

mod config;
mod policy;
mod sampler;
mod state;

#[cfg(test)]
mod tests;

pub use config::MonitorConfig;
pub use policy::{AdmissionPolicy, Projection};

use crate::error::{check_quantity, AdmissionError};
use crate::health::{components, HealthRegistry};
use crate::models::{
    bytes_to_mb, ResourceReservation, ResourceUsage, ReservedTotals, SchedulingDecision,
    TaskResourceRequirements, UsageStats,
};
use crate::observability::AdmissionMetrics;
use crate::telemetry::{
    create_collector, FallbackCollector, IoRates, RateTracker, TelemetryCollector, TelemetrySample,
};
use chrono::{DateTime, Utc};
use sampler::SamplingLoop;
use state::MonitorState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Concurrency reported for a dimension whose per-task estimate is not positive
pub const UNBOUNDED_DIMENSION_CONCURRENCY: usize = 10;

/// Receives every usage snapshot taken by the sampling loop
pub trait UsageObserver: Send + Sync {
    /// Handle one snapshot. Errors are logged and do not affect other
    /// observers or the loop.
    fn on_sample(&self, usage: &ResourceUsage) -> anyhow::Result<()>;

    /// Name used in logs when the observer fails
    fn name(&self) -> &str {
        "observer"
    }
}

/// Adapter turning a closure into an observer
pub struct CallbackObserver<F> {
    name: String,
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(&ResourceUsage) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> UsageObserver for CallbackObserver<F>
where
    F: Fn(&ResourceUsage) -> anyhow::Result<()> + Send + Sync,
{
    fn on_sample(&self, usage: &ResourceUsage) -> anyhow::Result<()> {
        (self.callback)(usage)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Handle returned by [`ResourceMonitor::add_observer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Running sampling task and the channel that stops it
struct Worker {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Host resource monitor and admission gate
pub struct ResourceMonitor {
    config: MonitorConfig,
    policy: AdmissionPolicy,
    collector: Arc<dyn TelemetryCollector>,
    state: Mutex<MonitorState>,
    rates: Mutex<RateTracker>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn UsageObserver>)>>,
    next_observer_id: AtomicU64,
    worker: Mutex<Option<Worker>>,
    metrics: Option<AdmissionMetrics>,
    health: Option<HealthRegistry>,
    collector_degraded: AtomicBool,
}

impl ResourceMonitor {
    /// Create a monitor from an already-validated configuration
    pub fn new(config: MonitorConfig, collector: Arc<dyn TelemetryCollector>) -> Self {
        Self {
            policy: AdmissionPolicy::new(config.cpu_threshold, config.memory_threshold),
            state: Mutex::new(MonitorState::new(config.history_size)),
            config,
            collector,
            rates: Mutex::new(RateTracker::new()),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            worker: Mutex::new(None),
            metrics: None,
            health: None,
            collector_degraded: AtomicBool::new(false),
        }
    }

    pub fn builder() -> ResourceMonitorBuilder {
        ResourceMonitorBuilder::new()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Name of the telemetry strategy in use
    pub fn collector_name(&self) -> &'static str {
        self.collector.name()
    }

    /// Start the background sampling loop. Calling it while the loop is
    /// running does nothing.
    ///
    /// The loop holds a reference to the monitor until
    /// [`stop_monitoring`](Self::stop_monitoring) is called.
    pub async fn start_monitoring(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let sampling = SamplingLoop::new(Arc::clone(self), self.config.sample_interval);
        let handle = tokio::spawn(sampling.run(shutdown_rx));
        *worker = Some(Worker { shutdown, handle });

        if let Some(health) = &self.health {
            health.set_healthy(components::MONITOR).await;
        }

        info!(
            cpu_threshold = self.config.cpu_threshold,
            memory_threshold = self.config.memory_threshold,
            sample_interval_ms = self.config.sample_interval.as_millis() as u64,
            collector = self.collector.name(),
            "Resource monitoring started"
        );
    }

    /// Stop the sampling loop and wait for it to exit. Safe to call when
    /// the loop was never started or has already exited; concurrent
    /// callers all return after the loop is gone.
    pub async fn stop_monitoring(&self) {
        let mut worker = self.worker.lock().await;
        let Some(Worker { shutdown, handle }) = worker.take() else {
            return;
        };

        // The receiver is gone if the loop already exited
        let _ = shutdown.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "Sampling loop ended abnormally");
        }

        if let Some(health) = &self.health {
            health
                .set_degraded(components::MONITOR, "Sampling loop stopped")
                .await;
        }

        info!("Resource monitoring stopped");
    }

    pub async fn is_monitoring(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Register an observer for every future sample
    pub async fn add_observer(&self, observer: Arc<dyn UsageObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        debug!(observer = observer.name(), "Registering usage observer");
        self.observers.write().await.push((id, observer));
        id
    }

    /// Register a closure as an observer
    pub async fn add_callback<F>(&self, name: impl Into<String>, callback: F) -> ObserverId
    where
        F: Fn(&ResourceUsage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_observer(Arc::new(CallbackObserver::new(name, callback)))
            .await
    }

    /// Unregister an observer; false if it was not registered
    pub async fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Fresh, uncached usage snapshot.
    ///
    /// A collector failure is logged and answered with the fixed fallback
    /// snapshot so admission stays available in a conservative mode.
    pub async fn get_current_usage(&self) -> ResourceUsage {
        let start = Instant::now();

        let usage = match self.collector.collect().await {
            Ok(sample) => {
                self.mark_collector_healthy().await;
                let rates = self.rates.lock().await.update(&sample);
                usage_from_sample(&sample, rates)
            }
            Err(e) => {
                warn!(
                    collector = self.collector.name(),
                    error = %e,
                    "Telemetry collection failed, using fallback snapshot"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_collection_errors();
                }
                self.mark_collector_degraded(&e.to_string()).await;
                // Leave the rate baseline alone; fallback counters are zero
                usage_from_sample(&FallbackCollector::snapshot(), IoRates::default())
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe_sample_latency(start.elapsed().as_secs_f64());
        }

        usage
    }

    /// One sampling-loop iteration: snapshot, record, notify
    pub(crate) async fn sample_once(&self) -> ResourceUsage {
        let usage = self.get_current_usage().await;

        self.state.lock().await.history.push(usage.clone());
        self.notify_observers(&usage).await;

        usage
    }

    async fn notify_observers(&self, usage: &ResourceUsage) {
        let observers: Vec<Arc<dyn UsageObserver>> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            let failure = match catch_unwind(AssertUnwindSafe(|| observer.on_sample(usage))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("observer panicked".to_string()),
            };

            if let Some(reason) = failure {
                error!(observer = observer.name(), error = %reason, "Usage observer failed");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_observer_errors();
                }
            }
        }
    }

    /// Decide whether a task may start now.
    ///
    /// Fails only when `requirements` is invalid; every valid request gets
    /// a decision carrying the snapshot it was based on.
    pub async fn can_schedule_task(
        &self,
        requirements: &TaskResourceRequirements,
    ) -> Result<SchedulingDecision, AdmissionError> {
        requirements.validate()?;

        let usage = self.get_current_usage().await;
        let reserved = self.reserved_totals().await;
        let decision = self.policy.evaluate(usage, &reserved, requirements);

        debug!(
            task_id = %requirements.task_id,
            priority = requirements.priority,
            can_schedule = decision.can_schedule,
            throttle_factor = ?decision.throttle_factor,
            delay_secs = ?decision.recommended_delay_seconds,
            reserved_cpu = reserved.cpu_percent,
            reserved_memory_mb = reserved.memory_mb,
            reason = %decision.reason,
            "Admission decision"
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_decision(decision.outcome());
        }

        Ok(decision)
    }

    /// Hold capacity for a task. Advisory: this does not check whether
    /// the capacity exists, call [`can_schedule_task`](Self::can_schedule_task)
    /// first. Without a duration the reservation lives until released.
    pub async fn reserve_resources(
        &self,
        task_id: &str,
        cpu_percent: f64,
        memory_mb: f64,
        duration: Option<Duration>,
    ) -> Result<Uuid, AdmissionError> {
        let invalid = |reason: String| AdmissionError::InvalidReservation {
            task_id: task_id.to_string(),
            reason,
        };
        check_quantity("cpu_percent", cpu_percent).map_err(invalid)?;
        check_quantity("memory_mb", memory_mb).map_err(invalid)?;

        let created_at = Utc::now();
        let expires_at = match duration {
            Some(d) => {
                let d = chrono::Duration::from_std(d)
                    .map_err(|_| invalid(format!("duration {d:?} is out of range")))?;
                Some(created_at + d)
            }
            None => None,
        };

        let reservation = ResourceReservation {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            cpu_reserved: cpu_percent,
            memory_reserved_mb: memory_mb,
            created_at,
            expires_at,
        };
        let id = reservation.id;

        let totals = {
            let mut state = self.state.lock().await;
            state.reservations.insert(reservation);
            state.reservations.totals()
        };

        debug!(
            reservation_id = %id,
            task_id = %task_id,
            cpu = cpu_percent,
            memory_mb = memory_mb,
            expires_at = ?expires_at,
            "Resources reserved"
        );

        if let Some(metrics) = &self.metrics {
            metrics.set_reservations(&totals);
        }

        Ok(id)
    }

    /// Drop a reservation. False when the id is unknown, already released,
    /// or was pruned after expiring.
    pub async fn release_resources(&self, reservation_id: Uuid) -> bool {
        let (released, totals) = {
            let mut state = self.state.lock().await;
            let released = state.reservations.remove(&reservation_id).is_some();
            (released, state.reservations.totals())
        };

        if released {
            debug!(reservation_id = %reservation_id, "Resources released");
            if let Some(metrics) = &self.metrics {
                metrics.set_reservations(&totals);
            }
        }

        released
    }

    /// Totals of all unexpired reservations, pruning expired ones first
    pub async fn reserved_totals(&self) -> ReservedTotals {
        let totals = {
            let mut state = self.state.lock().await;
            let pruned = state.reservations.prune_expired(Utc::now());
            if pruned > 0 {
                debug!(pruned, "Pruned expired reservations");
            }
            state.reservations.totals()
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_reservations(&totals);
        }

        totals
    }

    /// Unexpired reservations, oldest first
    pub async fn active_reservations(&self) -> Vec<ResourceReservation> {
        let mut state = self.state.lock().await;
        state.reservations.prune_expired(Utc::now());
        state.reservations.list()
    }

    /// Recorded snapshots newer than `now - window`, or all of them
    pub async fn get_usage_history(&self, window: Option<Duration>) -> Vec<ResourceUsage> {
        let cutoff = window.map(window_start);
        self.state.lock().await.history.since(cutoff)
    }

    /// CPU and memory avg/min/max over the window; zeroed when no
    /// samples fall inside it
    pub async fn get_usage_stats(&self, window: Duration) -> UsageStats {
        self.state
            .lock()
            .await
            .history
            .stats(window_start(window), window.as_secs_f64())
    }

    /// Most recent snapshot recorded by the sampling loop
    pub async fn latest_sample(&self) -> Option<ResourceUsage> {
        self.state.lock().await.history.latest().cloned()
    }

    /// Number of tasks of the given size that fit under the thresholds.
    ///
    /// The scarcer of CPU and memory headroom decides; never below 1.
    pub async fn get_recommended_concurrency(
        &self,
        task_cpu_estimate: f64,
        task_memory_estimate_mb: f64,
    ) -> usize {
        let usage = self.get_current_usage().await;

        let cpu_headroom = (self.config.cpu_threshold - usage.cpu_percent).max(0.0);
        let memory_headroom_percent = (self.config.memory_threshold - usage.memory_percent).max(0.0);

        let cpu_concurrency = tasks_fitting(cpu_headroom, task_cpu_estimate);
        let memory_concurrency = tasks_fitting(
            usage.memory_available_mb * memory_headroom_percent / 100.0,
            task_memory_estimate_mb,
        );

        let recommended = cpu_concurrency.min(memory_concurrency).max(1);

        debug!(
            recommended,
            cpu_headroom,
            memory_headroom_percent,
            cpu_concurrency,
            memory_concurrency,
            "Recommended concurrency"
        );

        recommended
    }

    async fn mark_collector_healthy(&self) {
        if self.collector_degraded.swap(false, Ordering::Relaxed) {
            info!(collector = self.collector.name(), "Telemetry collection recovered");
            if let Some(health) = &self.health {
                health.set_healthy(components::COLLECTOR).await;
            }
        }
    }

    async fn mark_collector_degraded(&self, reason: &str) {
        if !self.collector_degraded.swap(true, Ordering::Relaxed) {
            if let Some(health) = &self.health {
                health
                    .set_degraded(
                        components::COLLECTOR,
                        format!("Using fallback snapshot: {reason}"),
                    )
                    .await;
            }
        }
    }
}

/// Start of a look-back window ending now; the dawn of time for windows
/// too large to represent
fn window_start(window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn tasks_fitting(headroom: f64, per_task: f64) -> usize {
    if per_task.is_finite() && per_task > 0.0 {
        // `as` saturates; a NaN headroom becomes 0
        (headroom / per_task).floor() as usize
    } else {
        UNBOUNDED_DIMENSION_CONCURRENCY
    }
}

fn usage_from_sample(sample: &TelemetrySample, rates: IoRates) -> ResourceUsage {
    ResourceUsage {
        cpu_percent: sample.cpu_percent,
        memory_percent: sample.memory_percent(),
        memory_available_mb: bytes_to_mb(sample.memory_available_bytes),
        memory_used_mb: bytes_to_mb(sample.memory_used_bytes),
        memory_total_mb: bytes_to_mb(sample.memory_total_bytes),
        disk_read_bytes_per_sec: rates.disk_read_bytes_per_sec,
        disk_write_bytes_per_sec: rates.disk_write_bytes_per_sec,
        network_bytes_sent_per_sec: rates.network_sent_bytes_per_sec,
        network_bytes_recv_per_sec: rates.network_recv_bytes_per_sec,
        active_processes: sample.process_count,
        load_average_1m: sample.load_average[0],
        load_average_5m: sample.load_average[1],
        load_average_15m: sample.load_average[2],
        timestamp: Utc::now(),
    }
}

/// Builder for [`ResourceMonitor`]
#[derive(Default)]
pub struct ResourceMonitorBuilder {
    config: MonitorConfig,
    collector: Option<Arc<dyn TelemetryCollector>>,
    metrics: Option<AdmissionMetrics>,
    health: Option<HealthRegistry>,
}

impl ResourceMonitorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the telemetry collector (default: platform best fit)
    pub fn collector(mut self, collector: Arc<dyn TelemetryCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Record decisions, reservations and collection errors in Prometheus
    pub fn metrics(mut self, metrics: AdmissionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report monitor and collector status into a health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<ResourceMonitor, AdmissionError> {
        self.config.validate()?;

        let collector = self.collector.unwrap_or_else(create_collector);
        let mut monitor = ResourceMonitor::new(self.config, collector);
        monitor.metrics = self.metrics;
        monitor.health = self.health;
        Ok(monitor)
    }
}
