//! Core data models for admission control

use crate::error::{check_quantity, AdmissionError};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert a byte count to mebibytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Saturation tier of a resource, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePressure {
    /// Below 50% utilization
    Low,
    /// 50% up to 75%
    Moderate,
    /// 75% up to 90%
    High,
    /// 90% and above
    Critical,
}

impl ResourcePressure {
    /// Classify a utilization percentage. Boundaries are exact.
    pub fn classify(percent: f64) -> Self {
        if percent < 50.0 {
            Self::Low
        } else if percent < 75.0 {
            Self::Moderate
        } else if percent < 90.0 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Numeric level for gauges (0 = low .. 3 = critical)
    pub fn level(&self) -> i64 {
        *self as i64
    }
}

/// Point-in-time host resource snapshot
///
/// Created once per sample and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_mb: f64,
    pub memory_used_mb: f64,
    /// Total physical memory; 0 when the collector could not determine it
    #[serde(default)]
    pub memory_total_mb: f64,
    #[serde(default)]
    pub disk_read_bytes_per_sec: f64,
    #[serde(default)]
    pub disk_write_bytes_per_sec: f64,
    #[serde(default)]
    pub network_bytes_sent_per_sec: f64,
    #[serde(default)]
    pub network_bytes_recv_per_sec: f64,
    #[serde(default)]
    pub active_processes: usize,
    #[serde(default)]
    pub load_average_1m: f64,
    #[serde(default)]
    pub load_average_5m: f64,
    #[serde(default)]
    pub load_average_15m: f64,
    pub timestamp: DateTime<Utc>,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_available_mb: 0.0,
            memory_used_mb: 0.0,
            memory_total_mb: 0.0,
            disk_read_bytes_per_sec: 0.0,
            disk_write_bytes_per_sec: 0.0,
            network_bytes_sent_per_sec: 0.0,
            network_bytes_recv_per_sec: 0.0,
            active_processes: 0,
            load_average_1m: 0.0,
            load_average_5m: 0.0,
            load_average_15m: 0.0,
            timestamp: Utc::now(),
        }
    }
}

impl ResourceUsage {
    pub fn cpu_pressure(&self) -> ResourcePressure {
        ResourcePressure::classify(self.cpu_percent)
    }

    pub fn memory_pressure(&self) -> ResourcePressure {
        ResourcePressure::classify(self.memory_percent)
    }

    /// The most severe of CPU and memory pressure
    pub fn overall_pressure(&self) -> ResourcePressure {
        self.cpu_pressure().max(self.memory_pressure())
    }

    /// Memory figure used as the denominator when projecting a task's
    /// share of memory: total physical memory, or available memory when
    /// the total is unknown.
    pub fn memory_capacity_mb(&self) -> f64 {
        if self.memory_total_mb > 0.0 {
            self.memory_total_mb
        } else {
            self.memory_available_mb
        }
    }
}

impl Serialize for ResourceUsage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ResourceUsage", 17)?;
        s.serialize_field("cpu_percent", &self.cpu_percent)?;
        s.serialize_field("memory_percent", &self.memory_percent)?;
        s.serialize_field("memory_available_mb", &self.memory_available_mb)?;
        s.serialize_field("memory_used_mb", &self.memory_used_mb)?;
        s.serialize_field("memory_total_mb", &self.memory_total_mb)?;
        s.serialize_field("disk_read_bytes_per_sec", &self.disk_read_bytes_per_sec)?;
        s.serialize_field("disk_write_bytes_per_sec", &self.disk_write_bytes_per_sec)?;
        s.serialize_field("network_bytes_sent_per_sec", &self.network_bytes_sent_per_sec)?;
        s.serialize_field("network_bytes_recv_per_sec", &self.network_bytes_recv_per_sec)?;
        s.serialize_field("active_processes", &self.active_processes)?;
        s.serialize_field("load_average_1m", &self.load_average_1m)?;
        s.serialize_field("load_average_5m", &self.load_average_5m)?;
        s.serialize_field("load_average_15m", &self.load_average_15m)?;
        s.serialize_field("cpu_pressure", &self.cpu_pressure())?;
        s.serialize_field("memory_pressure", &self.memory_pressure())?;
        s.serialize_field("overall_pressure", &self.overall_pressure())?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.end()
    }
}

fn default_cpu_percent() -> f64 {
    10.0
}

fn default_memory_mb() -> f64 {
    256.0
}

fn default_duration_seconds() -> f64 {
    60.0
}

fn default_priority() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

/// Caller-supplied resource estimate for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResourceRequirements {
    pub task_id: String,
    #[serde(default = "default_cpu_percent")]
    pub estimated_cpu_percent: f64,
    #[serde(default = "default_memory_mb")]
    pub estimated_memory_mb: f64,
    #[serde(default = "default_duration_seconds")]
    pub estimated_duration_seconds: f64,
    /// 1-10, higher is more important
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_true")]
    pub can_be_throttled: bool,
    #[serde(default)]
    pub requires_gpu: bool,
}

impl TaskResourceRequirements {
    pub const MIN_PRIORITY: u8 = 1;
    pub const MAX_PRIORITY: u8 = 10;

    /// Requirements with the default profile
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            estimated_cpu_percent: default_cpu_percent(),
            estimated_memory_mb: default_memory_mb(),
            estimated_duration_seconds: default_duration_seconds(),
            priority: default_priority(),
            can_be_throttled: true,
            requires_gpu: false,
        }
    }

    pub fn with_cpu_percent(mut self, cpu_percent: f64) -> Self {
        self.estimated_cpu_percent = cpu_percent;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: f64) -> Self {
        self.estimated_memory_mb = memory_mb;
        self
    }

    pub fn with_duration_seconds(mut self, seconds: f64) -> Self {
        self.estimated_duration_seconds = seconds;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_throttling(mut self, can_be_throttled: bool) -> Self {
        self.can_be_throttled = can_be_throttled;
        self
    }

    pub fn with_gpu(mut self, requires_gpu: bool) -> Self {
        self.requires_gpu = requires_gpu;
        self
    }

    /// Reject estimates the admission algorithm cannot reason about
    pub fn validate(&self) -> Result<(), AdmissionError> {
        let invalid = |reason: String| AdmissionError::InvalidRequirements {
            task_id: self.task_id.clone(),
            reason,
        };

        check_quantity("estimated_cpu_percent", self.estimated_cpu_percent).map_err(invalid)?;
        check_quantity("estimated_memory_mb", self.estimated_memory_mb).map_err(invalid)?;
        check_quantity("estimated_duration_seconds", self.estimated_duration_seconds)
            .map_err(invalid)?;

        if !(Self::MIN_PRIORITY..=Self::MAX_PRIORITY).contains(&self.priority) {
            return Err(invalid(format!(
                "priority must be within {}..={}, got {}",
                Self::MIN_PRIORITY,
                Self::MAX_PRIORITY,
                self.priority
            )));
        }

        Ok(())
    }
}

/// Advisory hold on a slice of capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReservation {
    pub id: Uuid,
    pub task_id: String,
    pub cpu_reserved: f64,
    pub memory_reserved_mb: f64,
    pub created_at: DateTime<Utc>,
    /// Never extended once set; release and re-reserve instead
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResourceReservation {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now > expires_at)
    }
}

/// Sum of all live reservations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservedTotals {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub count: usize,
}

/// Classification of a decision for metrics and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionOutcome {
    Accepted,
    Throttled,
    Rejected,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Throttled => "throttled",
            Self::Rejected => "rejected",
        }
    }
}

/// Verdict for one admission request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub can_schedule: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_delay_seconds: Option<f64>,
    /// Fraction (0.0-1.0) of normal resource use the task should target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttle_factor: Option<f64>,
    /// Snapshot the verdict was computed from
    pub current_usage: ResourceUsage,
}

impl SchedulingDecision {
    pub fn accept(reason: impl Into<String>, usage: ResourceUsage) -> Self {
        Self {
            can_schedule: true,
            reason: reason.into(),
            recommended_delay_seconds: None,
            throttle_factor: None,
            current_usage: usage,
        }
    }

    pub fn throttle(reason: impl Into<String>, factor: f64, usage: ResourceUsage) -> Self {
        Self {
            can_schedule: true,
            reason: reason.into(),
            recommended_delay_seconds: None,
            throttle_factor: Some(factor),
            current_usage: usage,
        }
    }

    pub fn reject(reason: impl Into<String>, delay_seconds: f64, usage: ResourceUsage) -> Self {
        Self {
            can_schedule: false,
            reason: reason.into(),
            recommended_delay_seconds: Some(delay_seconds),
            throttle_factor: None,
            current_usage: usage,
        }
    }

    pub fn outcome(&self) -> DecisionOutcome {
        match (self.can_schedule, self.throttle_factor) {
            (false, _) => DecisionOutcome::Rejected,
            (true, Some(_)) => DecisionOutcome::Throttled,
            (true, None) => DecisionOutcome::Accepted,
        }
    }
}

/// Average, minimum and maximum of one metric over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    /// Summarize a series; an empty series yields zeros
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            avg: sum / count as f64,
            min,
            max,
        }
    }
}

/// Aggregated usage over a history window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub sample_count: usize,
    pub window_seconds: f64,
    pub cpu: MetricSummary,
    pub memory: MetricSummary,
}

impl UsageStats {
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// Observed resource use of one finished task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub duration_seconds: f64,
}
