//! Live host telemetry via `sysinfo`
//!
//! Reads:
//! - global CPU utilization (sampled over at least the sysinfo minimum interval)
//! - virtual memory totals
//! - block device counters from /proc/diskstats (Linux only, zero elsewhere)
//! - network interface byte counters
//! - load averages and live process count
//!
//! Only the CPU gauge is shared between callers. It is refreshed at most
//! once per `MINIMUM_CPU_UPDATE_INTERVAL`; callers arriving sooner reuse
//! the last figure. Everything else is read fresh on each call.

use super::diskstats::{read_diskstats, DiskCounters};
use super::{async_trait, TelemetryCollector, TelemetrySample};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{
    MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
    MINIMUM_CPU_UPDATE_INTERVAL,
};

/// CPU usage is a delta between two refreshes, so its state outlives a call
struct CpuGauge {
    system: System,
    last_refresh: Instant,
    last_percent: Option<f64>,
}

impl CpuGauge {
    fn new() -> Self {
        let mut system = System::new();
        // Prime the counters so the first real reading has a baseline
        system.refresh_cpu_usage();
        Self {
            system,
            last_refresh: Instant::now(),
            last_percent: None,
        }
    }

    fn read(&mut self) -> f64 {
        let since_refresh = self.last_refresh.elapsed();
        if since_refresh < MINIMUM_CPU_UPDATE_INTERVAL {
            match self.last_percent {
                Some(percent) => return percent,
                // No reading yet: wait out the interval once
                None => std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL - since_refresh),
            }
        }

        self.system.refresh_cpu_usage();
        self.last_refresh = Instant::now();
        let percent = f64::from(self.system.global_cpu_usage()).clamp(0.0, 100.0);
        self.last_percent = Some(percent);
        percent
    }
}

/// Blocking read of everything except CPU
fn sample_host(cpu_percent: f64, diskstats_path: Option<&PathBuf>) -> TelemetrySample {
    let mut system = System::new_with_specifics(
        RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
    );
    let memory_total_bytes = system.total_memory();
    let memory_available_bytes = system.available_memory();
    let memory_used_bytes = system.used_memory();

    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
    let process_count = system.processes().len();

    let load = System::load_average();

    let disk = match diskstats_path {
        Some(path) => read_diskstats(path).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Disk counters unavailable");
            DiskCounters::default()
        }),
        None => DiskCounters::default(),
    };

    let networks = Networks::new_with_refreshed_list();
    let (network_sent_bytes, network_recv_bytes) = networks
        .iter()
        .fold((0u64, 0u64), |(sent, recv), (_, data)| {
            (
                sent.saturating_add(data.total_transmitted()),
                recv.saturating_add(data.total_received()),
            )
        });

    TelemetrySample {
        cpu_percent,
        memory_total_bytes,
        memory_available_bytes,
        memory_used_bytes,
        disk_read_bytes: disk.read_bytes,
        disk_write_bytes: disk.write_bytes,
        network_sent_bytes,
        network_recv_bytes,
        load_average: [load.one, load.five, load.fifteen],
        process_count,
        collected_at: Instant::now(),
    }
}

/// Collector backed by the live host
pub struct SystemCollector {
    cpu: Arc<Mutex<CpuGauge>>,
    diskstats_path: Option<PathBuf>,
}

impl SystemCollector {
    /// Create a collector reading the standard `/proc/diskstats` on Linux
    pub fn new() -> Self {
        let diskstats_path = if cfg!(target_os = "linux") {
            Some(PathBuf::from("/proc/diskstats"))
        } else {
            None
        };
        Self::with_diskstats_path(diskstats_path)
    }

    /// Create collector with a custom diskstats location (for testing)
    pub fn with_diskstats_path(diskstats_path: Option<PathBuf>) -> Self {
        Self {
            cpu: Arc::new(Mutex::new(CpuGauge::new())),
            diskstats_path,
        }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryCollector for SystemCollector {
    async fn collect(&self) -> Result<TelemetrySample> {
        let cpu = Arc::clone(&self.cpu);
        let diskstats_path = self.diskstats_path.clone();

        tokio::task::spawn_blocking(move || {
            let cpu_percent = cpu
                .lock()
                .map_err(|_| anyhow!("CPU gauge lock poisoned by a previous panic"))?
                .read();
            Ok(sample_host(cpu_percent, diskstats_path.as_ref()))
        })
        .await
        .context("Telemetry worker thread failed")?
    }

    fn name(&self) -> &'static str {
        "system"
    }
}
