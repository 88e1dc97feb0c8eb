//! Per-task-type resource estimation
//!
//! Tracks what finished tasks actually used and turns that history into
//! requirements for the next task of the same type. Types with too few
//! samples get a static profile.

use crate::error::{check_quantity, AdmissionError};
use crate::models::{TaskResourceRequirements, TaskSample};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::debug;

/// Samples kept per task type
pub const MAX_SAMPLES_PER_TYPE: usize = 100;
/// Samples needed before history replaces the static profile
pub const MIN_SAMPLES_FOR_ESTIMATE: usize = 5;

/// Headroom applied to the mean CPU and memory
const RESOURCE_SAFETY_FACTOR: f64 = 1.2;
/// Headroom applied to the mean duration
const DURATION_SAFETY_FACTOR: f64 = 1.1;

/// Static (cpu %, memory MB, duration s) profile for known task types
fn static_profile(task_type: &str) -> Option<(f64, f64, f64)> {
    match task_type {
        "retrieval" => Some((15.0, 512.0, 30.0)),
        "synthesis" => Some((25.0, 1024.0, 60.0)),
        "report" => Some((20.0, 768.0, 45.0)),
        "embedding" => Some((30.0, 2048.0, 120.0)),
        _ => None,
    }
}

/// Learns resource requirements per task type
///
/// Safe to share across tasks; each task type is locked independently.
#[derive(Debug, Default)]
pub struct TaskResourceEstimator {
    history: DashMap<String, VecDeque<TaskSample>>,
}

impl TaskResourceEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record what a finished task used. The oldest sample for the type is
    /// dropped once [`MAX_SAMPLES_PER_TYPE`] is reached.
    pub fn record_task_resources(
        &self,
        task_type: &str,
        cpu_percent: f64,
        memory_mb: f64,
        duration_seconds: f64,
    ) -> Result<(), AdmissionError> {
        let invalid = |reason: String| AdmissionError::InvalidSample {
            task_type: task_type.to_string(),
            reason,
        };
        check_quantity("cpu_percent", cpu_percent).map_err(invalid)?;
        check_quantity("memory_mb", memory_mb).map_err(invalid)?;
        check_quantity("duration_seconds", duration_seconds).map_err(invalid)?;

        let mut samples = self.history.entry(task_type.to_string()).or_default();
        if samples.len() >= MAX_SAMPLES_PER_TYPE {
            samples.pop_front();
        }
        samples.push_back(TaskSample {
            cpu_percent,
            memory_mb,
            duration_seconds,
        });

        debug!(
            task_type = %task_type,
            samples = samples.len(),
            cpu_percent,
            memory_mb,
            duration_seconds,
            "Recorded task resources"
        );

        Ok(())
    }

    /// Requirements for a new task of `task_type`.
    ///
    /// With enough history this is the sample mean plus headroom;
    /// otherwise the type's static profile, or the generic default for
    /// unknown types. `priority` is carried through unchanged and checked
    /// when the requirements are submitted for admission.
    pub fn estimate_requirements(
        &self,
        task_type: &str,
        task_id: &str,
        priority: u8,
    ) -> TaskResourceRequirements {
        let base = TaskResourceRequirements::new(task_id).with_priority(priority);

        if let Some(samples) = self.history.get(task_type) {
            if samples.len() >= MIN_SAMPLES_FOR_ESTIMATE {
                let n = samples.len() as f64;
                let mean = |f: fn(&TaskSample) -> f64| samples.iter().map(f).sum::<f64>() / n;

                return base
                    .with_cpu_percent(mean(|s| s.cpu_percent) * RESOURCE_SAFETY_FACTOR)
                    .with_memory_mb(mean(|s| s.memory_mb) * RESOURCE_SAFETY_FACTOR)
                    .with_duration_seconds(mean(|s| s.duration_seconds) * DURATION_SAFETY_FACTOR);
            }
        }

        match static_profile(task_type) {
            Some((cpu, memory, duration)) => base
                .with_cpu_percent(cpu)
                .with_memory_mb(memory)
                .with_duration_seconds(duration),
            None => base,
        }
    }

    /// Number of recorded samples for a task type
    pub fn sample_count(&self, task_type: &str) -> usize {
        self.history.get(task_type).map_or(0, |s| s.len())
    }

    /// Task types with at least one recorded sample
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.history.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}
