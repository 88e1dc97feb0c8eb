//! Host telemetry collection
//!
//! Collectors report raw host readings: instantaneous CPU and memory
//! figures plus cumulative disk and network byte counters. The monitor
//! turns counters into rates with a [`RateTracker`].
//!
//! Two strategies exist and one is chosen at construction time:
//! [`SystemCollector`] reads the live host through `sysinfo` and
//! `/proc/diskstats`, while [`FallbackCollector`] returns a fixed
//! conservative snapshot on platforms `sysinfo` does not support.

mod diskstats;
mod fallback;
mod rates;
mod system;

pub use diskstats::{parse_diskstats, DiskCounters};
pub use fallback::FallbackCollector;
pub use rates::{IoRates, RateTracker};
pub use system::SystemCollector;

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

pub use async_trait::async_trait;

/// Raw readings from one collection pass
#[derive(Debug, Clone)]
pub struct TelemetrySample {
    pub cpu_percent: f64,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    pub memory_used_bytes: u64,
    /// Cumulative bytes read from block devices since boot
    pub disk_read_bytes: u64,
    /// Cumulative bytes written to block devices since boot
    pub disk_write_bytes: u64,
    /// Cumulative bytes sent over all interfaces
    pub network_sent_bytes: u64,
    /// Cumulative bytes received over all interfaces
    pub network_recv_bytes: u64,
    pub load_average: [f64; 3],
    pub process_count: usize,
    pub collected_at: Instant,
}

impl TelemetrySample {
    /// Memory utilization as `(total - available) / total`
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        let in_use = self
            .memory_total_bytes
            .saturating_sub(self.memory_available_bytes);
        in_use as f64 / self.memory_total_bytes as f64 * 100.0
    }
}

/// Trait for host telemetry implementations
#[async_trait]
pub trait TelemetryCollector: Send + Sync {
    /// Take a fresh reading. Implementations must not block the async
    /// runtime.
    async fn collect(&self) -> Result<TelemetrySample>;

    /// Short identifier used in logs and health reports
    fn name(&self) -> &'static str;
}

/// Create the collector best suited to this platform
pub fn create_collector() -> Arc<dyn TelemetryCollector> {
    if sysinfo::IS_SUPPORTED_SYSTEM {
        tracing::info!("Host telemetry supported, using system collector");
        Arc::new(SystemCollector::new())
    } else {
        tracing::warn!(
            "Host telemetry not supported on this platform, using fixed fallback snapshot"
        );
        Arc::new(FallbackCollector::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_percent() {
        let sample = TelemetrySample {
            cpu_percent: 0.0,
            memory_total_bytes: 1000,
            memory_available_bytes: 250,
            memory_used_bytes: 700,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            network_sent_bytes: 0,
            network_recv_bytes: 0,
            load_average: [0.0; 3],
            process_count: 0,
            collected_at: Instant::now(),
        };
        assert_eq!(sample.memory_percent(), 75.0);

        let unknown = TelemetrySample {
            memory_total_bytes: 0,
            ..sample
        };
        assert_eq!(unknown.memory_percent(), 0.0);
    }
}
