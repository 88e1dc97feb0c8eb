//! Resource-aware admission control for a single host
//!
//! This crate provides the core functionality for:
//! - Host telemetry sampling (CPU, memory, disk/network I/O, load)
//! - Admission decisions with pressure tiers, priority overrides and throttling
//! - Advisory resource reservations with lazy expiry
//! - Per-task-type resource estimation from historical samples
//! - Adaptive worker-pool concurrency
//! - Health checks and observability

pub mod concurrency;
pub mod error;
pub mod estimator;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod telemetry;

pub use concurrency::{
    AdjustmentReason, ConcurrencyAdjustment, ConcurrencyControllerConfig, ControllerStats,
    DynamicConcurrencyController,
};
pub use error::AdmissionError;
pub use estimator::TaskResourceEstimator;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use monitor::{
    CallbackObserver, MonitorConfig, ObserverId, ResourceMonitor, ResourceMonitorBuilder,
    UsageObserver,
};
pub use observability::{AdmissionMetrics, StructuredLogger};
pub use telemetry::{create_collector, FallbackCollector, SystemCollector, TelemetryCollector};
