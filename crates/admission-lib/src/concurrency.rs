//! Adaptive worker-pool sizing
//!
//! [`DynamicConcurrencyController`] nudges a concurrency level up while the
//! host has headroom and down when it is saturated, one step at a time
//! with a cooldown between changes so the level does not oscillate.

use crate::error::AdmissionError;
use crate::monitor::ResourceMonitor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Adjustments kept in the controller's history
pub const MAX_ADJUSTMENT_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyControllerConfig {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Scale up only while CPU is below this percentage (default: 60)
    pub scale_up_cpu_threshold: f64,
    /// Scale down once CPU exceeds this percentage (default: 85)
    pub scale_down_cpu_threshold: f64,
    /// Scale up only while memory is below this percentage (default: 65)
    pub scale_up_memory_threshold: f64,
    /// Scale down once memory exceeds this percentage (default: 90)
    pub scale_down_memory_threshold: f64,
    pub scale_up_increment: usize,
    pub scale_down_increment: usize,
    /// Minimum time between two adjustments (default: 10 seconds)
    pub cooldown: Duration,
    pub enabled: bool,
}

impl Default for ConcurrencyControllerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 1,
            max_concurrency: 10,
            scale_up_cpu_threshold: 60.0,
            scale_down_cpu_threshold: 85.0,
            scale_up_memory_threshold: 65.0,
            scale_down_memory_threshold: 90.0,
            scale_up_increment: 1,
            scale_down_increment: 1,
            cooldown: Duration::from_secs(10),
            enabled: true,
        }
    }
}

impl ConcurrencyControllerConfig {
    pub fn validate(&self) -> Result<(), AdmissionError> {
        if self.min_concurrency == 0 || self.min_concurrency > self.max_concurrency {
            return Err(AdmissionError::InvalidConfig(format!(
                "concurrency bounds must satisfy 1 <= min <= max, got {}..={}",
                self.min_concurrency, self.max_concurrency
            )));
        }

        if self.scale_up_increment == 0 || self.scale_down_increment == 0 {
            return Err(AdmissionError::InvalidConfig(
                "scale increments must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("scale_up_cpu_threshold", self.scale_up_cpu_threshold),
            ("scale_down_cpu_threshold", self.scale_down_cpu_threshold),
            ("scale_up_memory_threshold", self.scale_up_memory_threshold),
            ("scale_down_memory_threshold", self.scale_down_memory_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(AdmissionError::InvalidConfig(format!(
                    "{name} must be within [0, 100], got {value}"
                )));
            }
        }

        Ok(())
    }

    fn clamp(&self, level: usize) -> usize {
        level.clamp(self.min_concurrency, self.max_concurrency)
    }
}

/// Why [`DynamicConcurrencyController::evaluate_and_adjust`] returned the
/// level it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    Disabled,
    Cooldown,
    ScaleUp,
    ScaleDown,
    /// Within the band, or already at the bound it would move towards
    NoChange,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Cooldown => "cooldown",
            Self::ScaleUp => "scale_up",
            Self::ScaleDown => "scale_down",
            Self::NoChange => "no_change",
        }
    }
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded level change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyAdjustment {
    pub timestamp: DateTime<Utc>,
    pub old_concurrency: usize,
    pub new_concurrency: usize,
    pub reason: AdjustmentReason,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub current_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub adjustment_count: usize,
    pub last_adjustment: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug)]
struct ControllerState {
    current: usize,
    last_adjusted: Option<Instant>,
    history: VecDeque<ConcurrencyAdjustment>,
}

/// Adjusts a worker-pool concurrency level from live host readings
pub struct DynamicConcurrencyController {
    monitor: Arc<ResourceMonitor>,
    config: ConcurrencyControllerConfig,
    state: Mutex<ControllerState>,
}

impl DynamicConcurrencyController {
    /// Create a controller starting at `initial`, clamped to the
    /// configured bounds
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        initial: usize,
        config: ConcurrencyControllerConfig,
    ) -> Result<Self, AdmissionError> {
        config.validate()?;

        Ok(Self {
            monitor,
            state: Mutex::new(ControllerState {
                current: config.clamp(initial),
                last_adjusted: None,
                history: VecDeque::with_capacity(MAX_ADJUSTMENT_HISTORY),
            }),
            config,
        })
    }

    pub fn config(&self) -> &ConcurrencyControllerConfig {
        &self.config
    }

    pub async fn current_concurrency(&self) -> usize {
        self.state.lock().await.current
    }

    /// Read the host and move the level one step if warranted.
    ///
    /// Saturation is checked first: CPU or memory above its scale-down
    /// threshold lowers the level, both below their scale-up thresholds
    /// raise it. A change starts a new cooldown.
    pub async fn evaluate_and_adjust(&self) -> (usize, AdjustmentReason) {
        let mut state = self.state.lock().await;

        if !self.config.enabled {
            return (state.current, AdjustmentReason::Disabled);
        }

        if state
            .last_adjusted
            .is_some_and(|at| at.elapsed() < self.config.cooldown)
        {
            return (state.current, AdjustmentReason::Cooldown);
        }

        let usage = self.monitor.get_current_usage().await;
        let old = state.current;
        let cfg = &self.config;

        let (new, reason) = if usage.cpu_percent > cfg.scale_down_cpu_threshold
            || usage.memory_percent > cfg.scale_down_memory_threshold
        {
            (
                old.saturating_sub(cfg.scale_down_increment)
                    .max(cfg.min_concurrency),
                AdjustmentReason::ScaleDown,
            )
        } else if usage.cpu_percent < cfg.scale_up_cpu_threshold
            && usage.memory_percent < cfg.scale_up_memory_threshold
        {
            (
                old.saturating_add(cfg.scale_up_increment)
                    .min(cfg.max_concurrency),
                AdjustmentReason::ScaleUp,
            )
        } else {
            (old, AdjustmentReason::NoChange)
        };

        if new == old {
            debug!(
                concurrency = old,
                cpu_percent = usage.cpu_percent,
                memory_percent = usage.memory_percent,
                "Concurrency unchanged"
            );
            return (old, AdjustmentReason::NoChange);
        }

        state.current = new;
        state.last_adjusted = Some(Instant::now());
        if state.history.len() >= MAX_ADJUSTMENT_HISTORY {
            state.history.pop_front();
        }
        state.history.push_back(ConcurrencyAdjustment {
            timestamp: Utc::now(),
            old_concurrency: old,
            new_concurrency: new,
            reason,
            cpu_percent: usage.cpu_percent,
            memory_percent: usage.memory_percent,
        });

        info!(
            old = old,
            new = new,
            reason = reason.as_str(),
            cpu_percent = usage.cpu_percent,
            memory_percent = usage.memory_percent,
            "Concurrency adjusted"
        );

        (new, reason)
    }

    /// Set the level directly, clamped to the bounds. Does not touch the
    /// cooldown or history.
    pub async fn force_set_concurrency(&self, level: usize) -> usize {
        let mut state = self.state.lock().await;
        state.current = self.config.clamp(level);
        state.current
    }

    /// Recorded adjustments, oldest first
    pub async fn adjustment_history(&self) -> Vec<ConcurrencyAdjustment> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    pub async fn stats(&self) -> ControllerStats {
        let state = self.state.lock().await;
        ControllerStats {
            current_concurrency: state.current,
            min_concurrency: self.config.min_concurrency,
            max_concurrency: self.config.max_concurrency,
            adjustment_count: state.history.len(),
            last_adjustment: state.history.back().map(|a| a.timestamp),
            enabled: self.config.enabled,
        }
    }
}
