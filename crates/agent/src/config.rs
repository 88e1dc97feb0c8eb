//! Agent configuration

use admission_lib::MonitorConfig;
use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_ENV: &str = "ADMISSION_CONFIG_FILE";

/// Agent configuration
///
/// Every key can be set from the environment with the `ADMISSION_` prefix,
/// e.g. `ADMISSION_CPU_THRESHOLD=75`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Name attached to structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for the HTTP API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Projected CPU ceiling for admission, in percent
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f64,

    /// Projected memory ceiling for admission, in percent
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    /// Sampling loop interval in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Samples kept in the usage history
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_history_size() -> usize {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            cpu_threshold: default_cpu_threshold(),
            memory_threshold: default_memory_threshold(),
            sample_interval_ms: default_sample_interval_ms(),
            history_size: default_history_size(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the optional file named by
    /// `ADMISSION_CONFIG_FILE`, then the environment. Environment values
    /// take precedence.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let source = builder
            .add_source(config::Environment::with_prefix("ADMISSION").try_parsing(true))
            .build()?;

        Ok(Self::from_source(source))
    }

    /// Deserialize from a built source, falling back to defaults when the
    /// values do not fit
    pub fn from_source(source: config::Config) -> Self {
        source.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid agent configuration, using defaults");
            Self::default()
        })
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .with_cpu_threshold(self.cpu_threshold)
            .with_memory_threshold(self.memory_threshold)
            .with_sample_interval(Duration::from_millis(self.sample_interval_ms))
            .with_history_size(self.history_size)
    }
}
