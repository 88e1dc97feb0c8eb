//! Background sampling loop
//!
//! Takes one usage snapshot per tick, appends it to the bounded history
//! and fans it out to observers. A failed or panicking iteration is
//! logged and the loop carries on with the next tick.

use super::ResourceMonitor;
use crate::models::ResourcePressure;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Log a summary every this many samples
const SUMMARY_EVERY: u64 = 60;

pub(crate) struct SamplingLoop {
    monitor: Arc<ResourceMonitor>,
    interval: Duration,
}

impl SamplingLoop {
    pub fn new(monitor: Arc<ResourceMonitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }

    /// Run until a shutdown signal arrives or the sender is dropped
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting resource sampling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sample_count = 0u64;
        let mut failure_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();

                    // Run the iteration as its own task so a panic inside
                    // collection or notification surfaces as a JoinError.
                    let monitor = Arc::clone(&self.monitor);
                    match tokio::spawn(async move { monitor.sample_once().await }).await {
                        Ok(usage) => {
                            let pressure = usage.overall_pressure();
                            if pressure >= ResourcePressure::High {
                                warn!(
                                    cpu_percent = usage.cpu_percent,
                                    memory_percent = usage.memory_percent,
                                    pressure = pressure.as_str(),
                                    "High resource pressure"
                                );
                            }
                        }
                        Err(e) => {
                            failure_count += 1;
                            error!(error = %e, "Sampling iteration failed");
                        }
                    }

                    sample_count += 1;
                    if sample_count % SUMMARY_EVERY == 0 {
                        debug!(
                            samples = sample_count,
                            failures = failure_count,
                            last_elapsed_ms = start.elapsed().as_millis() as u64,
                            "Sampling loop progress"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!(samples = sample_count, "Shutting down resource sampling loop");
                    break;
                }
            }
        }
    }
}
