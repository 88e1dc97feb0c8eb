//! Admission policy
//!
//! A pure function of the live snapshot, the current reservation totals
//! and the request. Checks run in a fixed order: pressure-tier overrides
//! first, then the CPU and memory ceilings, then absolute free memory.
//! Priority only ever bypasses the critical-pressure gate.

use crate::models::{
    ResourcePressure, ResourceUsage, ReservedTotals, SchedulingDecision, TaskResourceRequirements,
};

/// Minimum priority admitted while the host is under critical pressure
pub const CRITICAL_BYPASS_PRIORITY: u8 = 8;
/// Minimum priority for non-throttleable work under high pressure
pub const HIGH_PRESSURE_MIN_PRIORITY: u8 = 6;

pub const CRITICAL_PRESSURE_DELAY_SECS: f64 = 30.0;
pub const HIGH_PRESSURE_DELAY_SECS: f64 = 10.0;
pub const CPU_THRESHOLD_DELAY_SECS: f64 = 5.0;
pub const MEMORY_THRESHOLD_DELAY_SECS: f64 = 10.0;
pub const INSUFFICIENT_MEMORY_DELAY_SECS: f64 = 15.0;

pub const HIGH_PRESSURE_THROTTLE: f64 = 0.5;
pub const CPU_THRESHOLD_THROTTLE: f64 = 0.7;

/// Figures derived from a snapshot before any check runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub available_cpu: f64,
    pub available_memory_mb: f64,
    pub projected_cpu: f64,
    pub projected_memory_percent: f64,
}

impl Projection {
    pub fn compute(
        usage: &ResourceUsage,
        reserved: &ReservedTotals,
        requirements: &TaskResourceRequirements,
    ) -> Self {
        let capacity_mb = usage.memory_capacity_mb();
        let memory_share = if capacity_mb > 0.0 {
            requirements.estimated_memory_mb / capacity_mb * 100.0
        } else if requirements.estimated_memory_mb > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Self {
            available_cpu: 100.0 - usage.cpu_percent - reserved.cpu_percent,
            available_memory_mb: usage.memory_available_mb - reserved.memory_mb,
            projected_cpu: usage.cpu_percent + reserved.cpu_percent + requirements.estimated_cpu_percent,
            projected_memory_percent: usage.memory_percent + memory_share,
        }
    }
}

/// Threshold-based admission policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionPolicy {
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
}

impl AdmissionPolicy {
    pub fn new(cpu_threshold: f64, memory_threshold: f64) -> Self {
        Self {
            cpu_threshold,
            memory_threshold,
        }
    }

    /// Decide whether `requirements` may start now. Every path returns a
    /// populated decision carrying `usage`.
    pub fn evaluate(
        &self,
        usage: ResourceUsage,
        reserved: &ReservedTotals,
        requirements: &TaskResourceRequirements,
    ) -> SchedulingDecision {
        let projection = Projection::compute(&usage, reserved, requirements);
        let pressure = usage.overall_pressure();

        if pressure == ResourcePressure::Critical
            && requirements.priority < CRITICAL_BYPASS_PRIORITY
        {
            return SchedulingDecision::reject(
                "System under critical resource pressure",
                CRITICAL_PRESSURE_DELAY_SECS,
                usage,
            );
        }

        if pressure == ResourcePressure::High {
            if requirements.can_be_throttled {
                return SchedulingDecision::throttle(
                    "High pressure, task will be throttled",
                    HIGH_PRESSURE_THROTTLE,
                    usage,
                );
            }
            if requirements.priority < HIGH_PRESSURE_MIN_PRIORITY {
                return SchedulingDecision::reject(
                    "High pressure, delaying low priority task",
                    HIGH_PRESSURE_DELAY_SECS,
                    usage,
                );
            }
        }

        if projection.projected_cpu > self.cpu_threshold {
            if requirements.can_be_throttled {
                return SchedulingDecision::throttle(
                    "CPU threshold exceeded, task will be throttled",
                    CPU_THRESHOLD_THROTTLE,
                    usage,
                );
            }
            return SchedulingDecision::reject(
                format!(
                    "CPU would exceed threshold ({:.1}% > {}%)",
                    projection.projected_cpu, self.cpu_threshold
                ),
                CPU_THRESHOLD_DELAY_SECS,
                usage,
            );
        }

        if projection.projected_memory_percent > self.memory_threshold {
            return SchedulingDecision::reject(
                format!(
                    "Memory would exceed threshold ({:.1}% > {}%)",
                    projection.projected_memory_percent, self.memory_threshold
                ),
                MEMORY_THRESHOLD_DELAY_SECS,
                usage,
            );
        }

        if projection.available_memory_mb < requirements.estimated_memory_mb {
            return SchedulingDecision::reject(
                format!(
                    "Insufficient memory ({:.0}MB < {:.0}MB needed)",
                    projection.available_memory_mb, requirements.estimated_memory_mb
                ),
                INSUFFICIENT_MEMORY_DELAY_SECS,
                usage,
            );
        }

        SchedulingDecision::accept("Resources available", usage)
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(80.0, 85.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cpu: f64, memory_percent: f64, available_mb: f64, total_mb: f64) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: cpu,
            memory_percent,
            memory_available_mb: available_mb,
            memory_used_mb: total_mb - available_mb,
            memory_total_mb: total_mb,
            ..ResourceUsage::default()
        }
    }

    fn no_reservations() -> ReservedTotals {
        ReservedTotals::default()
    }

    #[test]
    fn test_accepts_when_resources_available() {
        let policy = AdmissionPolicy::default();
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(10.0)
            .with_memory_mb(500.0);

        let decision = policy.evaluate(usage(60.0, 50.0, 4000.0, 8000.0), &no_reservations(), &req);

        assert!(decision.can_schedule);
        assert_eq!(decision.reason, "Resources available");
        assert_eq!(decision.throttle_factor, None);
        assert_eq!(decision.recommended_delay_seconds, None);
        assert_eq!(decision.current_usage.cpu_percent, 60.0);
    }

    #[test]
    fn test_rejects_cpu_overflow_when_not_throttleable() {
        let policy = AdmissionPolicy::default();
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(25.0)
            .with_memory_mb(500.0)
            .with_throttling(false);

        let decision = policy.evaluate(usage(60.0, 50.0, 4000.0, 8000.0), &no_reservations(), &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(5.0));
        assert!(decision.reason.contains("85.0% > 80%"));
    }

    #[test]
    fn test_throttles_cpu_overflow_when_throttleable() {
        let policy = AdmissionPolicy::default();
        let req = TaskResourceRequirements::new("t").with_cpu_percent(25.0);

        let decision = policy.evaluate(usage(60.0, 50.0, 4000.0, 8000.0), &no_reservations(), &req);

        assert!(decision.can_schedule);
        assert_eq!(decision.throttle_factor, Some(CPU_THRESHOLD_THROTTLE));
    }

    #[test]
    fn test_critical_pressure_priority_bypass() {
        let policy = AdmissionPolicy::default();
        let critical = usage(95.0, 40.0, 8000.0, 16000.0);

        let low = TaskResourceRequirements::new("t").with_priority(7);
        let decision = policy.evaluate(critical.clone(), &no_reservations(), &low);
        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(30.0));

        let high = TaskResourceRequirements::new("t").with_priority(8);
        let decision = policy.evaluate(critical, &no_reservations(), &high);
        assert!(decision.can_schedule);
    }

    #[test]
    fn test_priority_does_not_bypass_absolute_checks() {
        let policy = AdmissionPolicy::default();
        let critical = usage(92.0, 40.0, 8000.0, 16000.0);
        let req = TaskResourceRequirements::new("t")
            .with_priority(10)
            .with_throttling(false);

        let decision = policy.evaluate(critical, &no_reservations(), &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(CPU_THRESHOLD_DELAY_SECS));
    }

    #[test]
    fn test_high_pressure_throttle_precedes_threshold_checks() {
        let policy = AdmissionPolicy::default();
        // Memory far beyond what is available; the throttle still wins
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(50.0)
            .with_memory_mb(100_000.0);

        let decision = policy.evaluate(usage(80.0, 40.0, 1000.0, 16000.0), &no_reservations(), &req);

        assert!(decision.can_schedule);
        assert_eq!(decision.throttle_factor, Some(0.5));
    }

    #[test]
    fn test_high_pressure_delays_low_priority_unthrottleable() {
        let policy = AdmissionPolicy::default();
        let req = TaskResourceRequirements::new("t")
            .with_priority(5)
            .with_throttling(false);

        let decision = policy.evaluate(usage(40.0, 80.0, 3000.0, 16000.0), &no_reservations(), &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(10.0));
    }

    #[test]
    fn test_high_pressure_high_priority_falls_through() {
        let policy = AdmissionPolicy::default();
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(1.0)
            .with_memory_mb(100.0)
            .with_priority(6)
            .with_throttling(false);

        let decision = policy.evaluate(usage(76.0, 40.0, 8000.0, 16000.0), &no_reservations(), &req);

        assert!(decision.can_schedule);
        assert_eq!(decision.reason, "Resources available");
    }

    #[test]
    fn test_memory_threshold_rejection() {
        let policy = AdmissionPolicy::default();
        // 70% used, task asks for 20% of total memory
        let req = TaskResourceRequirements::new("t").with_memory_mb(2000.0);

        let decision = policy.evaluate(usage(10.0, 70.0, 3000.0, 10000.0), &no_reservations(), &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(MEMORY_THRESHOLD_DELAY_SECS));
    }

    #[test]
    fn test_reserved_memory_counts_against_available() {
        let policy = AdmissionPolicy::default();
        let reserved = ReservedTotals {
            cpu_percent: 0.0,
            memory_mb: 1800.0,
            count: 1,
        };
        let req = TaskResourceRequirements::new("t").with_memory_mb(500.0);

        let decision = policy.evaluate(usage(10.0, 40.0, 2000.0, 100_000.0), &reserved, &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(INSUFFICIENT_MEMORY_DELAY_SECS));
        assert!(decision.reason.starts_with("Insufficient memory (200MB"));
    }

    #[test]
    fn test_reserved_cpu_counts_toward_projection() {
        let policy = AdmissionPolicy::default();
        let reserved = ReservedTotals {
            cpu_percent: 30.0,
            memory_mb: 0.0,
            count: 2,
        };
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(5.0)
            .with_throttling(false);

        let decision = policy.evaluate(usage(50.0, 40.0, 8000.0, 16000.0), &reserved, &req);

        assert!(!decision.can_schedule);
        assert_eq!(decision.recommended_delay_seconds, Some(CPU_THRESHOLD_DELAY_SECS));
    }

    #[test]
    fn test_projection_uses_total_memory() {
        let req = TaskResourceRequirements::new("t")
            .with_cpu_percent(10.0)
            .with_memory_mb(500.0);
        let projection =
            Projection::compute(&usage(60.0, 50.0, 4000.0, 8000.0), &no_reservations(), &req);

        assert_eq!(projection.projected_cpu, 70.0);
        assert_eq!(projection.projected_memory_percent, 56.25);
        assert_eq!(projection.available_cpu, 40.0);
        assert_eq!(projection.available_memory_mb, 4000.0);
    }

    #[test]
    fn test_projection_without_memory_figures() {
        let req = TaskResourceRequirements::new("t").with_memory_mb(1.0);
        let projection = Projection::compute(&usage(0.0, 0.0, 0.0, 0.0), &no_reservations(), &req);
        assert!(projection.projected_memory_percent.is_infinite());

        let policy = AdmissionPolicy::default();
        let decision = policy.evaluate(usage(0.0, 0.0, 0.0, 0.0), &no_reservations(), &req);
        assert!(!decision.can_schedule);
    }
}
