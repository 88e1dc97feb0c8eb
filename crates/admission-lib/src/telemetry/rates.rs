//! Per-second rates from cumulative counters

use super::TelemetrySample;
use std::time::Instant;

/// Disk and network throughput derived from two consecutive samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoRates {
    pub disk_read_bytes_per_sec: f64,
    pub disk_write_bytes_per_sec: f64,
    pub network_sent_bytes_per_sec: f64,
    pub network_recv_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    disk_read: u64,
    disk_write: u64,
    net_sent: u64,
    net_recv: u64,
    at: Instant,
}

impl From<&TelemetrySample> for Counters {
    fn from(sample: &TelemetrySample) -> Self {
        Self {
            disk_read: sample.disk_read_bytes,
            disk_write: sample.disk_write_bytes,
            net_sent: sample.network_sent_bytes,
            net_recv: sample.network_recv_bytes,
            at: sample.collected_at,
        }
    }
}

/// Differences each sample's counters against the previous one.
///
/// The first sample yields zero rates. A counter that went backwards
/// (device removed, interface reset, counter wrap) yields zero for that
/// counter rather than a negative rate.
#[derive(Debug, Default)]
pub struct RateTracker {
    previous: Option<Counters>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute rates for `sample` and remember its counters
    pub fn update(&mut self, sample: &TelemetrySample) -> IoRates {
        let current = Counters::from(sample);

        let rates = match self.previous {
            Some(prev) => {
                let elapsed = current.at.saturating_duration_since(prev.at).as_secs_f64();
                if elapsed > 0.0 {
                    IoRates {
                        disk_read_bytes_per_sec: rate(prev.disk_read, current.disk_read, elapsed),
                        disk_write_bytes_per_sec: rate(prev.disk_write, current.disk_write, elapsed),
                        network_sent_bytes_per_sec: rate(prev.net_sent, current.net_sent, elapsed),
                        network_recv_bytes_per_sec: rate(prev.net_recv, current.net_recv, elapsed),
                    }
                } else {
                    IoRates::default()
                }
            }
            None => IoRates::default(),
        };

        self.previous = Some(current);
        rates
    }
}

fn rate(previous: u64, current: u64, elapsed_secs: f64) -> f64 {
    current.saturating_sub(previous) as f64 / elapsed_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(disk_read: u64, net_recv: u64, at: Instant) -> TelemetrySample {
        TelemetrySample {
            cpu_percent: 0.0,
            memory_total_bytes: 0,
            memory_available_bytes: 0,
            memory_used_bytes: 0,
            disk_read_bytes: disk_read,
            disk_write_bytes: 0,
            network_sent_bytes: 0,
            network_recv_bytes: net_recv,
            load_average: [0.0; 3],
            process_count: 0,
            collected_at: at,
        }
    }

    #[test]
    fn test_first_sample_has_zero_rates() {
        let mut tracker = RateTracker::new();
        let rates = tracker.update(&sample(1_000_000, 5_000, Instant::now()));
        assert_eq!(rates, IoRates::default());
    }

    #[test]
    fn test_rates_from_counter_deltas() {
        let mut tracker = RateTracker::new();
        let start = Instant::now();
        tracker.update(&sample(1_000, 2_000, start));

        let rates = tracker.update(&sample(3_000, 6_000, start + Duration::from_secs(2)));
        assert_eq!(rates.disk_read_bytes_per_sec, 1_000.0);
        assert_eq!(rates.network_recv_bytes_per_sec, 2_000.0);
        assert_eq!(rates.disk_write_bytes_per_sec, 0.0);
    }

    #[test]
    fn test_counter_reset_yields_zero() {
        let mut tracker = RateTracker::new();
        let start = Instant::now();
        tracker.update(&sample(10_000, 10_000, start));

        let rates = tracker.update(&sample(500, 20_000, start + Duration::from_secs(1)));
        assert_eq!(rates.disk_read_bytes_per_sec, 0.0);
        assert_eq!(rates.network_recv_bytes_per_sec, 10_000.0);
    }

    #[test]
    fn test_zero_elapsed_yields_zero() {
        let mut tracker = RateTracker::new();
        let at = Instant::now();
        tracker.update(&sample(0, 0, at));
        let rates = tracker.update(&sample(100, 100, at));
        assert_eq!(rates, IoRates::default());
    }
}
