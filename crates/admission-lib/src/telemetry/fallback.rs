//! Fixed-value collector for hosts without telemetry support

use super::{async_trait, TelemetryCollector, TelemetrySample};
use anyhow::Result;
use std::time::Instant;

const MB: u64 = 1024 * 1024;

/// Returns the same conservative snapshot on every call: 50% CPU and
/// 60% memory, so admission keeps working in a cautious mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackCollector;

impl FallbackCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn snapshot() -> TelemetrySample {
        TelemetrySample {
            cpu_percent: 50.0,
            memory_total_bytes: 20480 * MB,
            memory_available_bytes: 8192 * MB,
            memory_used_bytes: 12288 * MB,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            network_sent_bytes: 0,
            network_recv_bytes: 0,
            load_average: [0.0; 3],
            process_count: 0,
            collected_at: Instant::now(),
        }
    }
}

#[async_trait]
impl TelemetryCollector for FallbackCollector {
    async fn collect(&self) -> Result<TelemetrySample> {
        Ok(Self::snapshot())
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
