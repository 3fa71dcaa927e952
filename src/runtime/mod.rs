//! Runtime abstraction: opaque execution backends and infer-request handles.
//!
//! The backing runtime is exercised only through [`ModelRuntime`]; model
//! loading and device plumbing live behind it and outside this crate's scope.

pub mod accumulator;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::status::StatusCode;
use crate::tensor::{Tensor, TensorDesc};

/// A mutable query-state entry carried by an infer-request handle. The value
/// persists across executions until reset or overwritten.
#[derive(Debug, Clone)]
pub struct QueryState {
    name: String,
    default: Tensor,
    value: Tensor,
}

impl QueryState {
    pub fn new(name: impl Into<String>, default: Tensor) -> Self {
        let value = default.clone();
        QueryState {
            name: name.into(),
            default,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restores the state to its model default.
    pub fn reset(&mut self) {
        self.value = self.default.clone();
    }

    pub fn set_state(&mut self, value: Tensor) {
        self.value = value;
    }

    pub fn state(&self) -> &Tensor {
        &self.value
    }
}

/// An execution slot bound to a model: input/output tensors plus the model's
/// query-state collection. Handles are pooled and reused across requests.
#[derive(Debug)]
pub struct InferRequest {
    id: usize,
    inputs: BTreeMap<String, Tensor>,
    outputs: BTreeMap<String, Tensor>,
    query_states: Vec<QueryState>,
}

impl InferRequest {
    pub fn new(id: usize, query_states: Vec<QueryState>) -> Self {
        InferRequest {
            id,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            query_states,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Drops tensors from the previous request; query state is untouched.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
    }

    pub fn set_input(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.inputs.insert(name.into(), tensor);
    }

    pub fn input(&self, name: &str) -> Option<&Tensor> {
        self.inputs.get(name)
    }

    pub fn set_output(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.outputs.insert(name.into(), tensor);
    }

    pub fn output(&self, name: &str) -> Option<&Tensor> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> &BTreeMap<String, Tensor> {
        &self.outputs
    }

    pub fn query_states(&self) -> &[QueryState] {
        &self.query_states
    }

    pub fn query_states_mut(&mut self) -> &mut [QueryState] {
        &mut self.query_states
    }
}

/// Opaque backing runtime bound to one loaded model. Exposes declared tensor
/// metadata, creates infer-request handles, and executes them synchronously
/// from the handle's point of view.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    fn inputs_info(&self) -> &BTreeMap<String, TensorDesc>;

    fn outputs_info(&self) -> &BTreeMap<String, TensorDesc>;

    /// Number of parallel execution streams the device was configured with.
    fn streams(&self) -> u32;

    fn create_infer_request(&self, id: usize) -> InferRequest;

    async fn execute(&self, request: &mut InferRequest) -> Result<(), StatusCode>;

    /// Applied at load time when the model config requests it. Runtimes
    /// without the transformation accept it as a no-op.
    fn apply_low_latency_transformation(&mut self) -> Result<(), StatusCode> {
        Ok(())
    }
}
