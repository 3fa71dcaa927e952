//! Server state: the model table and shared services.

pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::{ModelConfig, ServerConfig};
use crate::instance::StatefulModelInstance;
use crate::metrics::MetricRegistry;
use crate::runtime::accumulator::AccumulatorRuntime;
use crate::runtime::ModelRuntime;
use crate::status::StatusCode;
use crate::sweeper::SequenceSweeper;

/// Input width the reference runtime falls back to when the model config
/// does not override the input shape.
const DEFAULT_INPUT_WIDTH: usize = 10;

/// Shared server state: loaded models, the metric registry, and the idle
/// sequence sweeper. New configs are installed by building a fresh model
/// table and swapping it in atomically.
pub struct ServerState {
    models: RwLock<HashMap<String, Arc<StatefulModelInstance>>>,
    metrics: Arc<MetricRegistry>,
    sweeper: Arc<SequenceSweeper>,
}

impl ServerState {
    pub async fn new(
        config: &ServerConfig,
        sweeper_interval: Duration,
        max_sequence_idle: Duration,
    ) -> anyhow::Result<Arc<Self>> {
        let metrics = Arc::new(MetricRegistry::new(&config.monitoring.metrics));
        let sweeper = Arc::new(SequenceSweeper::new(sweeper_interval, max_sequence_idle));
        let state = Arc::new(ServerState {
            models: RwLock::new(HashMap::new()),
            metrics,
            sweeper,
        });
        state.load_models(config).await?;
        Ok(state)
    }

    async fn load_models(&self, config: &ServerConfig) -> anyhow::Result<()> {
        let mut models = HashMap::new();
        for entry in &config.model_config_list {
            let model_config = &entry.config;
            let runtime = build_runtime(model_config);
            let instance = StatefulModelInstance::load(model_config, runtime, &self.metrics)
                .map_err(|status| {
                    anyhow::anyhow!("loading model {}: {status}", model_config.name)
                })?;
            if model_config.stateful {
                instance.register_for_cleanup(&self.sweeper);
            }
            models.insert(model_config.name.clone(), instance);
        }
        info!(models = models.len(), "servable manager initialized");
        *self.models.write().await = models;
        Ok(())
    }

    /// Installs a new config. The fresh model table replaces the old one
    /// atomically; retired instances drain their in-flight requests first.
    pub async fn reload(&self, config: &ServerConfig) -> anyhow::Result<()> {
        let previous: Vec<Arc<StatefulModelInstance>> =
            self.models.read().await.values().cloned().collect();
        for instance in &previous {
            instance.retire(&self.sweeper).await;
        }
        self.load_models(config).await
    }

    /// Resolves a model by name and optional version.
    pub async fn instance(
        &self,
        name: &str,
        version: Option<u64>,
    ) -> Result<Arc<StatefulModelInstance>, StatusCode> {
        let models = self.models.read().await;
        let instance = models.get(name).cloned().ok_or(StatusCode::ModelMissing)?;
        if let Some(requested) = version {
            if requested != instance.version() {
                return Err(StatusCode::ModelVersionMissing);
            }
        }
        Ok(instance)
    }

    pub fn metrics(&self) -> &Arc<MetricRegistry> {
        &self.metrics
    }

    pub fn sweeper(&self) -> &Arc<SequenceSweeper> {
        &self.sweeper
    }
}

/// Stands in for device-specific model loading, which lives outside this
/// crate: every model is served by the reference accumulator runtime shaped
/// by its config.
fn build_runtime(config: &ModelConfig) -> Box<dyn ModelRuntime> {
    let width = config
        .shape
        .get(crate::runtime::accumulator::INPUT_NAME)
        .and_then(|dims| dims.last())
        .filter(|&&last| last > 0)
        .map(|&last| last as usize)
        .unwrap_or(DEFAULT_INPUT_WIDTH);
    Box::new(AccumulatorRuntime::new(width, config.streams()))
}
