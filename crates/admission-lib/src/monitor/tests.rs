//! Monitor tests driven by scripted collectors
//!
//! The collectors report fixed readings so admission verdicts can be
//! asserted exactly without depending on the host.

use super::*;
use crate::health::ComponentStatus;
use crate::models::DecisionOutcome;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex as StdMutex;

const MB: u64 = 1024 * 1024;

/// Collector returning whatever reading it was last given
struct ScriptedCollector {
    sample: StdMutex<TelemetrySample>,
}

impl ScriptedCollector {
    fn new(cpu_percent: f64, total_mb: u64, available_mb: u64) -> Arc<Self> {
        Arc::new(Self {
            sample: StdMutex::new(reading(cpu_percent, total_mb, available_mb)),
        })
    }

    fn set(&self, cpu_percent: f64, total_mb: u64, available_mb: u64) {
        *self.sample.lock().unwrap() = reading(cpu_percent, total_mb, available_mb);
    }
}

fn reading(cpu_percent: f64, total_mb: u64, available_mb: u64) -> TelemetrySample {
    TelemetrySample {
        cpu_percent,
        memory_total_bytes: total_mb * MB,
        memory_available_bytes: available_mb * MB,
        memory_used_bytes: (total_mb - available_mb) * MB,
        disk_read_bytes: 0,
        disk_write_bytes: 0,
        network_sent_bytes: 0,
        network_recv_bytes: 0,
        load_average: [1.0, 0.5, 0.25],
        process_count: 42,
        collected_at: Instant::now(),
    }
}

#[async_trait::async_trait]
impl TelemetryCollector for ScriptedCollector {
    async fn collect(&self) -> anyhow::Result<TelemetrySample> {
        let mut sample = self.sample.lock().unwrap().clone();
        sample.collected_at = Instant::now();
        Ok(sample)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct FailingCollector;

#[async_trait::async_trait]
impl TelemetryCollector for FailingCollector {
    async fn collect(&self) -> anyhow::Result<TelemetrySample> {
        anyhow::bail!("telemetry source unavailable")
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Collector that panics on its first `panics` calls, then reports normally
struct CrashingCollector {
    calls: AtomicUsize,
    panics: usize,
}

#[async_trait::async_trait]
impl TelemetryCollector for CrashingCollector {
    async fn collect(&self) -> anyhow::Result<TelemetrySample> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.panics {
            panic!("telemetry driver crashed");
        }
        Ok(reading(40.0, 8000, 6000))
    }

    fn name(&self) -> &'static str {
        "crashing"
    }
}

struct CountingObserver {
    calls: AtomicUsize,
}

impl UsageObserver for CountingObserver {
    fn on_sample(&self, _usage: &ResourceUsage) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "counting"
    }
}

struct PanickingObserver;

impl UsageObserver for PanickingObserver {
    fn on_sample(&self, _usage: &ResourceUsage) -> anyhow::Result<()> {
        panic!("observer bug");
    }
}

fn monitor_with(collector: Arc<dyn TelemetryCollector>) -> Arc<ResourceMonitor> {
    Arc::new(ResourceMonitor::new(MonitorConfig::default(), collector))
}

/// 60% CPU, 50% memory with 4000 MB available
fn moderate_host() -> Arc<ScriptedCollector> {
    ScriptedCollector::new(60.0, 8000, 4000)
}

#[tokio::test]
async fn test_accepts_task_that_fits() {
    let monitor = monitor_with(moderate_host());
    let req = TaskResourceRequirements::new("task-1")
        .with_cpu_percent(10.0)
        .with_memory_mb(500.0);

    let decision = monitor.can_schedule_task(&req).await.unwrap();

    assert!(decision.can_schedule);
    assert_eq!(decision.reason, "Resources available");
    assert_eq!(decision.throttle_factor, None);
    assert_eq!(decision.current_usage.cpu_percent, 60.0);
    assert_eq!(decision.current_usage.memory_percent, 50.0);
    assert_eq!(decision.current_usage.memory_available_mb, 4000.0);
}

#[tokio::test]
async fn test_rejects_unthrottleable_cpu_overflow() {
    let monitor = monitor_with(moderate_host());
    let req = TaskResourceRequirements::new("task-2")
        .with_cpu_percent(25.0)
        .with_memory_mb(500.0)
        .with_throttling(false);

    let decision = monitor.can_schedule_task(&req).await.unwrap();

    assert!(!decision.can_schedule);
    assert_eq!(decision.recommended_delay_seconds, Some(5.0));
    assert_eq!(decision.outcome(), DecisionOutcome::Rejected);
}

#[tokio::test]
async fn test_critical_pressure_admits_only_high_priority() {
    let monitor = monitor_with(ScriptedCollector::new(95.0, 16000, 8000));

    let urgent = TaskResourceRequirements::new("urgent").with_priority(8);
    let decision = monitor.can_schedule_task(&urgent).await.unwrap();
    assert!(decision.can_schedule);

    let routine = TaskResourceRequirements::new("routine").with_priority(7);
    let decision = monitor.can_schedule_task(&routine).await.unwrap();
    assert!(!decision.can_schedule);
    assert_eq!(decision.recommended_delay_seconds, Some(30.0));
}

#[tokio::test]
async fn test_high_pressure_throttles() {
    let monitor = monitor_with(ScriptedCollector::new(80.0, 16000, 8000));
    let req = TaskResourceRequirements::new("t");

    let decision = monitor.can_schedule_task(&req).await.unwrap();

    assert!(decision.can_schedule);
    assert_eq!(decision.throttle_factor, Some(0.5));
}

#[tokio::test]
async fn test_invalid_requirements_are_errors() {
    let monitor = monitor_with(moderate_host());
    let req = TaskResourceRequirements::new("bad").with_cpu_percent(-1.0);

    let err = monitor.can_schedule_task(&req).await.unwrap_err();
    assert!(matches!(err, AdmissionError::InvalidRequirements { .. }));

    let req = TaskResourceRequirements::new("bad").with_priority(11);
    assert!(monitor.can_schedule_task(&req).await.is_err());
}

#[tokio::test]
async fn test_reservation_expires_and_frees_capacity() {
    let monitor = monitor_with(moderate_host());
    let req = TaskResourceRequirements::new("next")
        .with_cpu_percent(10.0)
        .with_memory_mb(100.0)
        .with_throttling(false);

    monitor
        .reserve_resources("holder", 30.0, 100.0, Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let totals = monitor.reserved_totals().await;
    assert_eq!(totals.count, 1);
    assert_eq!(totals.cpu_percent, 30.0);

    // 60 + 30 + 10 > 80
    let decision = monitor.can_schedule_task(&req).await.unwrap();
    assert!(!decision.can_schedule);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(monitor.reserved_totals().await.count, 0);
    assert!(monitor.active_reservations().await.is_empty());
    let decision = monitor.can_schedule_task(&req).await.unwrap();
    assert!(decision.can_schedule);
}

#[tokio::test]
async fn test_release_is_one_shot() {
    let monitor = monitor_with(moderate_host());

    let id = monitor
        .reserve_resources("task", 5.0, 64.0, None)
        .await
        .unwrap();
    let active = monitor.active_reservations().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].task_id, "task");
    assert_eq!(active[0].expires_at, None);

    assert!(monitor.release_resources(id).await);
    assert!(!monitor.release_resources(id).await);
    assert!(!monitor.release_resources(Uuid::new_v4()).await);
    assert_eq!(monitor.reserved_totals().await.count, 0);
}

#[tokio::test]
async fn test_reserve_rejects_bad_amounts() {
    let monitor = monitor_with(moderate_host());

    let err = monitor
        .reserve_resources("task", -5.0, 64.0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AdmissionError::InvalidReservation { .. }));

    assert!(monitor
        .reserve_resources("task", 5.0, f64::NAN, None)
        .await
        .is_err());
    assert_eq!(monitor.reserved_totals().await.count, 0);
}

#[tokio::test]
async fn test_reservations_are_not_capacity_checked() {
    let monitor = monitor_with(moderate_host());

    let id = monitor
        .reserve_resources("huge", 500.0, 1_000_000.0, None)
        .await;
    assert!(id.is_ok());
}

#[tokio::test]
async fn test_collector_failure_uses_fallback_snapshot() {
    let health = HealthRegistry::new();
    let monitor = ResourceMonitor::builder()
        .collector(Arc::new(FailingCollector))
        .metrics(AdmissionMetrics::new())
        .health(health.clone())
        .build()
        .unwrap();
    let errors_before = AdmissionMetrics::new().collection_errors_total();

    let usage = monitor.get_current_usage().await;

    assert_eq!(usage.cpu_percent, 50.0);
    assert!((usage.memory_percent - 60.0).abs() < 1e-9);
    assert_eq!(usage.memory_available_mb, 8192.0);
    assert_eq!(usage.memory_used_mb, 12288.0);
    assert_eq!(usage.disk_read_bytes_per_sec, 0.0);
    assert_eq!(
        health.status_of(components::COLLECTOR).await,
        Some(ComponentStatus::Degraded)
    );
    assert!(AdmissionMetrics::new().collection_errors_total() > errors_before);

    // Admission keeps working against the fallback
    let decision = monitor
        .can_schedule_task(&TaskResourceRequirements::new("t"))
        .await
        .unwrap();
    assert!(decision.can_schedule);
}

#[tokio::test]
async fn test_observer_failures_are_isolated() {
    let monitor = monitor_with(moderate_host());
    let counter = Arc::new(CountingObserver {
        calls: AtomicUsize::new(0),
    });

    monitor.add_observer(Arc::new(PanickingObserver)).await;
    monitor
        .add_callback("erroring", |_| Err(anyhow::anyhow!("sink closed")))
        .await;
    let counting_id = monitor.add_observer(counter.clone()).await;

    monitor.sample_once().await;
    monitor.sample_once().await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);

    assert!(monitor.remove_observer(counting_id).await);
    assert!(!monitor.remove_observer(counting_id).await);

    monitor.sample_once().await;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let config = MonitorConfig::default()
        .with_sample_interval(Duration::from_millis(10))
        .with_history_size(5);
    let monitor = Arc::new(ResourceMonitor::new(config, moderate_host()));

    // Stopping before starting is a no-op
    monitor.stop_monitoring().await;
    assert!(!monitor.is_monitoring().await);

    monitor.start_monitoring().await;
    monitor.start_monitoring().await;
    assert!(monitor.is_monitoring().await);

    tokio::time::sleep(Duration::from_millis(150)).await;

    tokio::join!(monitor.stop_monitoring(), monitor.stop_monitoring());
    assert!(!monitor.is_monitoring().await);

    // Bounded by history_size
    let history = monitor.get_usage_history(None).await;
    assert!(!history.is_empty());
    assert!(history.len() <= 5);
    assert_eq!(monitor.latest_sample().await.map(|u| u.cpu_percent), Some(60.0));

    // And it can be started again
    monitor.start_monitoring().await;
    assert!(monitor.is_monitoring().await);
    monitor.stop_monitoring().await;
}

#[tokio::test]
async fn test_sampling_survives_panicking_iterations() {
    let collector = Arc::new(CrashingCollector {
        calls: AtomicUsize::new(0),
        panics: 3,
    });
    let config = MonitorConfig::default()
        .with_sample_interval(Duration::from_millis(10))
        .with_history_size(100);
    let monitor = Arc::new(ResourceMonitor::new(config, collector.clone()));

    monitor.start_monitoring().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(monitor.is_monitoring().await);
    assert!(collector.calls.load(Ordering::SeqCst) > 3);
    let recorded = monitor.get_usage_history(None).await.len();
    assert!(recorded >= 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.is_monitoring().await);
    assert!(monitor.get_usage_history(None).await.len() > recorded);
    assert_eq!(monitor.latest_sample().await.map(|u| u.cpu_percent), Some(40.0));

    monitor.stop_monitoring().await;
}

#[tokio::test]
async fn test_usage_history_and_stats() {
    let collector = moderate_host();
    let monitor = monitor_with(collector.clone());

    monitor.sample_once().await;
    collector.set(30.0, 8000, 6000);
    monitor.sample_once().await;
    collector.set(90.0, 8000, 2000);
    monitor.sample_once().await;

    let history = monitor.get_usage_history(Some(Duration::from_secs(60))).await;
    assert_eq!(history.len(), 3);

    let stats = monitor.get_usage_stats(Duration::from_secs(60)).await;
    assert_eq!(stats.sample_count, 3);
    assert_eq!(stats.cpu.avg, 60.0);
    assert_eq!(stats.cpu.min, 30.0);
    assert_eq!(stats.cpu.max, 90.0);
    assert_eq!(stats.memory.min, 25.0);
    assert_eq!(stats.memory.max, 75.0);
}

#[tokio::test]
async fn test_usage_stats_empty_history() {
    let monitor = monitor_with(moderate_host());

    let stats = monitor.get_usage_stats(Duration::from_secs(60)).await;
    assert!(stats.is_empty());
    assert_eq!(stats.cpu.avg, 0.0);
    assert!(monitor.latest_sample().await.is_none());
}

#[tokio::test]
async fn test_recommended_concurrency() {
    let monitor = monitor_with(moderate_host());

    // CPU headroom 20 / 10 = 2; memory 4000 MB * 35% / 500 = 2
    assert_eq!(monitor.get_recommended_concurrency(10.0, 500.0).await, 2);

    // Memory is the scarcer dimension: 1400 / 1000 = 1
    assert_eq!(monitor.get_recommended_concurrency(5.0, 1000.0).await, 1);

    // Never below one
    assert_eq!(monitor.get_recommended_concurrency(100.0, 500.0).await, 1);

    // A non-positive estimate counts as 10 for that dimension
    assert_eq!(monitor.get_recommended_concurrency(0.0, 100.0).await, 10);
    assert_eq!(monitor.get_recommended_concurrency(1.0, -1.0).await, 10);
}

#[tokio::test]
async fn test_recommended_concurrency_over_threshold() {
    let monitor = monitor_with(ScriptedCollector::new(95.0, 8000, 400));
    assert_eq!(monitor.get_recommended_concurrency(1.0, 1.0).await, 1);
}

#[tokio::test]
async fn test_builder_validates_config() {
    let result = ResourceMonitor::builder()
        .config(MonitorConfig::default().with_cpu_threshold(150.0))
        .collector(moderate_host())
        .build();
    assert!(matches!(result, Err(AdmissionError::InvalidConfig(_))));

    let monitor = ResourceMonitor::builder()
        .collector(moderate_host())
        .build()
        .unwrap();
    assert_eq!(monitor.collector_name(), "scripted");
    assert_eq!(monitor.config().history_size, 300);
}

#[test]
fn test_tasks_fitting() {
    assert_eq!(tasks_fitting(20.0, 10.0), 2);
    assert_eq!(tasks_fitting(19.9, 10.0), 1);
    assert_eq!(tasks_fitting(0.0, 10.0), 0);
    assert_eq!(tasks_fitting(20.0, 0.0), UNBOUNDED_DIMENSION_CONCURRENCY);
    assert_eq!(tasks_fitting(20.0, f64::NAN), UNBOUNDED_DIMENSION_CONCURRENCY);
}
