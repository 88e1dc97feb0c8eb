//! Monitor configuration

use crate::error::AdmissionError;
use std::time::Duration;

/// Configuration for the resource monitor
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Admission ceiling for projected CPU utilization, in percent (default: 80)
    pub cpu_threshold: f64,
    /// Admission ceiling for projected memory utilization, in percent (default: 85)
    pub memory_threshold: f64,
    /// Sampling cadence of the background loop (default: 1 second)
    pub sample_interval: Duration,
    /// Capacity of the usage history ring (default: 300, five minutes at 1 Hz)
    pub history_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 80.0,
            memory_threshold: 85.0,
            sample_interval: Duration::from_secs(1),
            history_size: 300,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CPU admission ceiling
    pub fn with_cpu_threshold(mut self, percent: f64) -> Self {
        self.cpu_threshold = percent;
        self
    }

    /// Set the memory admission ceiling
    pub fn with_memory_threshold(mut self, percent: f64) -> Self {
        self.memory_threshold = percent;
        self
    }

    /// Set the sampling interval
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Set the history ring capacity
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), AdmissionError> {
        for (name, value) in [
            ("cpu_threshold", self.cpu_threshold),
            ("memory_threshold", self.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(AdmissionError::InvalidConfig(format!(
                    "{name} must be within (0, 100], got {value}"
                )));
            }
        }

        if self.sample_interval.is_zero() {
            return Err(AdmissionError::InvalidConfig(
                "sample_interval must be greater than zero".to_string(),
            ));
        }

        if self.history_size == 0 {
            return Err(AdmissionError::InvalidConfig(
                "history_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
