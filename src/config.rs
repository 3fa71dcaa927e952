//! Server configuration: CLI arguments and the JSON config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use serde::Deserialize;

use crate::tensor::Shape;

/// Metric families enabled by default when metrics are turned on without an
/// explicit list.
pub const DEFAULT_METRIC_FAMILIES: &[&str] = &[
    "ovms_current_requests",
    "ovms_requests_success",
    "ovms_requests_fail",
    "ovms_request_time_us",
    "ovms_streams",
    "ovms_inference_time_us",
    "ovms_wait_for_infer_req_time_us",
];

/// Metric families that must be requested explicitly.
pub const ADDITIONAL_METRIC_FAMILIES: &[&str] =
    &["ovms_infer_req_queue_size", "ovms_infer_req_active"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config_path: PathBuf,

    /// Port for the REST and metrics endpoints
    #[arg(long, default_value_t = 8080)]
    pub rest_port: u16,

    /// Seconds between idle-sequence sweeper ticks
    #[arg(long, default_value_t = 5)]
    pub sequence_cleaner_poll_wait_seconds: u64,

    /// Seconds a sequence may stay untouched before the sweeper evicts it
    #[arg(long, default_value_t = 60)]
    pub max_sequence_idle_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub model_config_list: Vec<ModelConfigEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub metrics: MetricConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub metrics_list: Vec<String>,
}

impl MetricConfig {
    /// The enabled-metrics list is authoritative: with an explicit list only
    /// its entries exist; without one the default family set applies.
    pub fn is_family_enabled(&self, family: &str) -> bool {
        if !self.enable {
            return false;
        }
        if self.metrics_list.is_empty() {
            DEFAULT_METRIC_FAMILIES.contains(&family)
        } else {
            self.metrics_list.iter().any(|name| name == family)
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        for name in &self.metrics_list {
            if !DEFAULT_METRIC_FAMILIES.contains(&name.as_str())
                && !ADDITIONAL_METRIC_FAMILIES.contains(&name.as_str())
            {
                bail!("unknown metric family in metrics_list: {name}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfigEntry {
    pub config: ModelConfig,
}

/// Batch-dimension handling during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchingMode {
    Static,
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BatchSize {
    Fixed(u64),
    Mode(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_nireq")]
    pub nireq: usize,
    #[serde(default)]
    pub plugin_config: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default = "default_max_sequence_number")]
    pub max_sequence_number: u32,
    #[serde(default = "default_idle_sequence_cleanup")]
    pub idle_sequence_cleanup: bool,
    #[serde(default)]
    pub low_latency_transformation: bool,
    #[serde(default)]
    pub batch_size: Option<BatchSize>,
    /// Per-input declared-shape overrides.
    #[serde(default)]
    pub shape: BTreeMap<String, Vec<i64>>,
}

fn default_nireq() -> usize {
    1
}

fn default_max_sequence_number() -> u32 {
    500
}

fn default_idle_sequence_cleanup() -> bool {
    true
}

impl ModelConfig {
    pub fn batching_mode(&self) -> BatchingMode {
        match &self.batch_size {
            Some(BatchSize::Mode(mode)) if mode == "auto" => BatchingMode::Auto,
            _ => BatchingMode::Static,
        }
    }

    /// Execution streams requested through the plugin config, defaulting to 1.
    pub fn streams(&self) -> u32 {
        let raw = self.plugin_config.get("CPU_THROUGHPUT_STREAMS");
        match raw {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(1) as u32,
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(1),
            _ => 1,
        }
    }

    pub fn shape_overrides(&self) -> BTreeMap<String, Shape> {
        self.shape
            .iter()
            .map(|(name, dims)| (name.clone(), Shape::new(dims.clone())))
            .collect()
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            bail!("model config entry is missing a name");
        }
        if self.nireq == 0 {
            bail!("model {}: nireq must be at least 1", self.name);
        }
        if self.max_sequence_number == 0 {
            bail!("model {}: max_sequence_number must be at least 1", self.name);
        }
        Ok(())
    }
}

/// Reads and validates the JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: ServerConfig = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    config.monitoring.metrics.validate()?;
    for entry in &config.model_config_list {
        entry.config.validate()?;
    }
    Ok(config)
}
