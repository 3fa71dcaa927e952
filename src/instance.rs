//! Stateful model instance: the request lifecycle orchestrator.
//!
//! `infer` is the single public entry point turning a validated request into
//! a serialized response: validate → bind sequence → acquire handle → install
//! state → deserialize → execute → serialize → commit state → release →
//! finalize sequence → commit metrics. Any failing stage releases its
//! resources, rolls back a just-created sequence, and leaves sequence memory
//! untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::api::ExecutionContext;
use crate::config::{BatchingMode, ModelConfig};
use crate::metrics::{MetricRegistry, ModelMetricReporter};
use crate::pool::InferRequestPool;
use crate::runtime::{InferRequest, ModelRuntime};
use crate::sequence_manager::{BoundSequence, SequenceControl, SequenceManager, SequenceProcessingSpec};
use crate::status::StatusCode;
use crate::sweeper::SequenceSweeper;
use crate::tensor::{InferenceRequest, InferenceResponse, Shape, Tensor, TensorDesc};
use crate::validation::{self, SEQUENCE_ID_INPUT, SPECIAL_INPUT_NAMES};

/// All models are served as a single version until multi-version discovery
/// exists.
pub const DEFAULT_MODEL_VERSION: u64 = 1;

/// Availability of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVersionState {
    Available,
    Retired,
}

impl ModelVersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVersionState::Available => "AVAILABLE",
            ModelVersionState::Retired => "END",
        }
    }
}

/// Declared tensor metadata returned by the metadata endpoints.
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    pub name: String,
    pub version: u64,
    pub inputs: BTreeMap<String, TensorDesc>,
    pub outputs: BTreeMap<String, TensorDesc>,
}

/// Counts in-flight requests so retirement can wait for them to drain.
struct UnloadTracker {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl UnloadTracker {
    fn new() -> Arc<Self> {
        Arc::new(UnloadTracker {
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        })
    }

    fn guard(self: &Arc<Self>) -> UnloadGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        UnloadGuard {
            tracker: Arc::clone(self),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Held for the duration of one request; delays reload and retirement.
pub struct UnloadGuard {
    tracker: Arc<UnloadTracker>,
}

impl Drop for UnloadGuard {
    fn drop(&mut self) {
        if self.tracker.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.drained.notify_waiters();
        }
    }
}

pub struct StatefulModelInstance {
    name: String,
    version: u64,
    runtime: Arc<dyn ModelRuntime>,
    pool: InferRequestPool,
    sequence_manager: Arc<SequenceManager>,
    reporter: Arc<ModelMetricReporter>,
    batching_mode: BatchingMode,
    shape_overrides: BTreeMap<String, Shape>,
    idle_sequence_cleanup: bool,
    available: AtomicBool,
    unload: Arc<UnloadTracker>,
}

impl StatefulModelInstance {
    /// Builds a ready-to-serve instance from its config and a loaded runtime.
    pub fn load(
        config: &ModelConfig,
        mut runtime: Box<dyn ModelRuntime>,
        registry: &MetricRegistry,
    ) -> Result<Arc<Self>, StatusCode> {
        if config.low_latency_transformation {
            runtime.apply_low_latency_transformation()?;
            debug!(model = %config.name, "applied low latency transformation");
        }
        let version = DEFAULT_MODEL_VERSION;
        let reporter = ModelMetricReporter::new(registry, &config.name, version);
        reporter.set_streams(i64::from(runtime.streams()));
        reporter.set_queue_size(config.nireq as i64);
        let pool = InferRequestPool::new(runtime.as_ref(), config.nireq);
        let sequence_manager = Arc::new(SequenceManager::new(
            config.max_sequence_number,
            config.name.clone(),
            version,
        ));
        info!(
            model = %config.name,
            version,
            nireq = config.nireq,
            max_sequence_number = config.max_sequence_number,
            "loaded stateful model"
        );
        Ok(Arc::new(StatefulModelInstance {
            name: config.name.clone(),
            version,
            runtime: Arc::from(runtime),
            pool,
            sequence_manager,
            reporter,
            batching_mode: config.batching_mode(),
            shape_overrides: config.shape_overrides(),
            idle_sequence_cleanup: config.idle_sequence_cleanup,
            available: AtomicBool::new(true),
            unload: UnloadTracker::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sequence_manager(&self) -> &Arc<SequenceManager> {
        &self.sequence_manager
    }

    pub fn reporter(&self) -> &Arc<ModelMetricReporter> {
        &self.reporter
    }

    pub fn idle_sequence_cleanup(&self) -> bool {
        self.idle_sequence_cleanup
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Runs one stateful inference request; metrics are committed exactly
    /// once for every outcome.
    pub async fn infer(
        &self,
        ctx: ExecutionContext,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, StatusCode> {
        self.infer_with_deadline(ctx, request, None).await
    }

    /// Like [`infer`](Self::infer), honoring the transport's deadline up to
    /// the point an infer handle is acquired. Once execution starts the
    /// request runs to completion.
    pub async fn infer_with_deadline(
        &self,
        ctx: ExecutionContext,
        request: &InferenceRequest,
        deadline: Option<Duration>,
    ) -> Result<InferenceResponse, StatusCode> {
        let _current = self.reporter.current_requests_guard();
        let started = Instant::now();
        let outcome = self.infer_stages(request, deadline).await;
        match &outcome {
            Ok(_) => {
                self.reporter.increment_success(ctx);
                self.reporter
                    .observe_request_time(ctx.interface, started.elapsed().as_micros() as f64);
            }
            Err(status) => {
                debug!(model = %self.name, version = self.version, %status, "inference request failed");
                self.reporter.increment_fail(ctx);
            }
        }
        outcome
    }

    async fn infer_stages(
        &self,
        request: &InferenceRequest,
        deadline: Option<Duration>,
    ) -> Result<InferenceResponse, StatusCode> {
        if !self.is_available() {
            return Err(StatusCode::ModelNotReady);
        }
        let _unload = self.unload.guard();

        let mut spec = validation::validate_special_keys(request)?;
        validation::validate(
            request,
            self.runtime.inputs_info(),
            &SPECIAL_INPUT_NAMES,
            self.batching_mode,
            &self.shape_overrides,
        )?;

        let bound = self.sequence_manager.bind(&mut spec).await?;
        let started_here = spec.control == SequenceControl::Start;

        match self.infer_bound(request, &spec, bound, deadline).await {
            Ok(response) => {
                if spec.control == SequenceControl::End {
                    self.sequence_manager.remove(spec.sequence_id).await?;
                    debug!(
                        model = %self.name,
                        sequence_id = spec.sequence_id,
                        "sequence ended and removed"
                    );
                }
                Ok(response)
            }
            Err(status) => {
                // A failed start must not leak a live sequence.
                if started_here {
                    if let Err(rollback) = self.sequence_manager.remove(spec.sequence_id).await {
                        warn!(
                            model = %self.name,
                            sequence_id = spec.sequence_id,
                            %rollback,
                            "could not roll back sequence after failed start"
                        );
                    }
                }
                Err(status)
            }
        }
    }

    /// The stages that run while the per-sequence lock is held. The bound
    /// sequence and the pool guard are both dropped before returning.
    async fn infer_bound(
        &self,
        request: &InferenceRequest,
        spec: &SequenceProcessingSpec,
        mut bound: BoundSequence,
        deadline: Option<Duration>,
    ) -> Result<InferenceResponse, StatusCode> {
        let acquire_started = Instant::now();
        let mut infer_request = self
            .pool
            .acquire(deadline, Arc::clone(&self.reporter))
            .await?;
        let wait_us = acquire_started.elapsed().as_micros() as f64;
        self.reporter.observe_wait_time(wait_us);
        debug!(
            model = %self.name,
            version = self.version,
            slot = infer_request.id(),
            wait_us,
            "acquired infer request slot"
        );

        infer_request.clear();
        self.pre_inference_processing(&mut infer_request, &bound, spec)?;

        for (name, tensor) in &request.inputs {
            if !SPECIAL_INPUT_NAMES.contains(&name.as_str()) {
                infer_request.set_input(name.clone(), tensor.clone());
            }
        }

        let execute_started = Instant::now();
        self.runtime.execute(&mut infer_request).await?;
        self.reporter
            .observe_inference_time(execute_started.elapsed().as_micros() as f64);

        let mut response = InferenceResponse {
            model_name: self.name.clone(),
            model_version: self.version,
            outputs: BTreeMap::new(),
        };
        for name in self.runtime.outputs_info().keys() {
            let tensor = infer_request.output(name).ok_or_else(|| {
                error!(model = %self.name, output = %name, "runtime produced no declared output");
                StatusCode::Internal
            })?;
            response.outputs.insert(name.clone(), tensor.clone());
        }

        self.post_inference_processing(&mut response, &mut infer_request, &mut bound, spec);
        Ok(response)
    }

    /// Installs the sequence's memory onto the handle, or resets it on start.
    fn pre_inference_processing(
        &self,
        infer_request: &mut InferRequest,
        bound: &BoundSequence,
        spec: &SequenceProcessingSpec,
    ) -> Result<(), StatusCode> {
        if spec.control == SequenceControl::Start {
            for state in infer_request.query_states_mut() {
                state.reset();
            }
            return Ok(());
        }
        let memory = bound.memory();
        for state in infer_request.query_states_mut() {
            let blob = memory.get(state.name()).ok_or_else(|| {
                // The sequence was created under a different model shape.
                error!(
                    model = %self.name,
                    sequence_id = bound.id(),
                    state = state.name(),
                    "sequence memory is missing a state entry"
                );
                StatusCode::Internal
            })?;
            state.set_state(blob.clone());
        }
        Ok(())
    }

    /// Snapshots the handle's state back into the sequence, or resets the
    /// handle on end, and appends the `sequence_id` output tensor.
    fn post_inference_processing(
        &self,
        response: &mut InferenceResponse,
        infer_request: &mut InferRequest,
        bound: &mut BoundSequence,
        spec: &SequenceProcessingSpec,
    ) {
        if spec.control == SequenceControl::End {
            debug!(
                model = %self.name,
                sequence_id = spec.sequence_id,
                "sequence end signal received, resetting model state"
            );
            for state in infer_request.query_states_mut() {
                state.reset();
            }
        } else {
            let memory = bound.memory_mut();
            for state in infer_request.query_states() {
                memory.insert(state.name().to_string(), state.state().clone());
            }
        }
        response.outputs.insert(
            SEQUENCE_ID_INPUT.to_string(),
            Tensor::scalar_u64(spec.sequence_id),
        );
    }

    /// Declared tensor metadata; metered like any other endpoint call.
    pub fn metadata(&self, ctx: ExecutionContext) -> Result<ModelMetadata, StatusCode> {
        if !self.is_available() {
            self.reporter.increment_fail(ctx);
            return Err(StatusCode::ModelNotReady);
        }
        let metadata = ModelMetadata {
            name: self.name.clone(),
            version: self.version,
            inputs: self.runtime.inputs_info().clone(),
            outputs: self.runtime.outputs_info().clone(),
        };
        self.reporter.increment_success(ctx);
        Ok(metadata)
    }

    /// Version state for the status endpoints.
    pub fn status(&self, ctx: ExecutionContext) -> ModelVersionState {
        self.reporter.increment_success(ctx);
        if self.is_available() {
            ModelVersionState::Available
        } else {
            ModelVersionState::Retired
        }
    }

    /// Readiness for the KServe surface.
    pub fn ready(&self, ctx: ExecutionContext) -> bool {
        self.reporter.increment_success(ctx);
        self.is_available()
    }

    /// Registers the sequence manager for periodic idle cleanup.
    pub fn register_for_cleanup(&self, sweeper: &SequenceSweeper) {
        if self.idle_sequence_cleanup {
            sweeper.register(&self.sequence_manager);
        }
    }

    /// Stops accepting requests, waits for in-flight ones to drain, then
    /// drops all sequence state.
    pub async fn retire(&self, sweeper: &SequenceSweeper) {
        self.available.store(false, Ordering::Release);
        if self.idle_sequence_cleanup {
            sweeper.unregister(&self.name, self.version);
        }
        self.unload.wait_idle().await;
        self.sequence_manager.clear().await;
        info!(model = %self.name, version = self.version, "retired stateful model");
    }
}
