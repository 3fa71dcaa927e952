//! Reference stateful runtime: an element-wise running sum.
//!
//! Each execution adds the input vector to the accumulated state and returns
//! the new total, so sequence round-trips have observable behavior without a
//! real device backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::status::StatusCode;
use crate::tensor::{Precision, Shape, Tensor, TensorData, TensorDesc};

use super::{InferRequest, ModelRuntime, QueryState};

pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "sum";
pub const STATE_NAME: &str = "accumulated_sum";

pub struct AccumulatorRuntime {
    inputs: BTreeMap<String, TensorDesc>,
    outputs: BTreeMap<String, TensorDesc>,
    width: usize,
    streams: u32,
}

impl AccumulatorRuntime {
    pub fn new(width: usize, streams: u32) -> Self {
        let desc = TensorDesc::new(Shape::new(vec![1, width as i64]), Precision::Fp32);
        let mut inputs = BTreeMap::new();
        inputs.insert(INPUT_NAME.to_string(), desc.clone());
        let mut outputs = BTreeMap::new();
        outputs.insert(OUTPUT_NAME.to_string(), desc);
        AccumulatorRuntime {
            inputs,
            outputs,
            width,
            streams,
        }
    }

    fn zero_state(&self) -> Tensor {
        Tensor::new(
            Shape::new(vec![1, self.width as i64]),
            TensorData::Fp32(vec![0.0; self.width]),
        )
    }
}

#[async_trait]
impl ModelRuntime for AccumulatorRuntime {
    fn inputs_info(&self) -> &BTreeMap<String, TensorDesc> {
        &self.inputs
    }

    fn outputs_info(&self) -> &BTreeMap<String, TensorDesc> {
        &self.outputs
    }

    fn streams(&self) -> u32 {
        self.streams
    }

    fn create_infer_request(&self, id: usize) -> InferRequest {
        InferRequest::new(id, vec![QueryState::new(STATE_NAME, self.zero_state())])
    }

    async fn execute(&self, request: &mut InferRequest) -> Result<(), StatusCode> {
        let values = {
            let input = request.input(INPUT_NAME).ok_or(StatusCode::Internal)?;
            input.fp32().ok_or(StatusCode::Internal)?.to_vec()
        };
        if values.len() != self.width {
            return Err(StatusCode::Internal);
        }
        let state = request
            .query_states_mut()
            .first_mut()
            .ok_or(StatusCode::Internal)?;
        let mut accumulated = state.state().fp32().ok_or(StatusCode::Internal)?.to_vec();
        for (total, value) in accumulated.iter_mut().zip(values.iter().copied()) {
            *total += value;
        }
        let result = Tensor::new(
            Shape::new(vec![1, self.width as i64]),
            TensorData::Fp32(accumulated),
        );
        state.set_state(result.clone());
        request.set_output(OUTPUT_NAME, result);
        Ok(())
    }

    fn apply_low_latency_transformation(&mut self) -> Result<(), StatusCode> {
        debug!("low latency transformation requested, nothing to rewrite");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(values: Vec<f32>) -> Tensor {
        let width = values.len() as i64;
        Tensor::new(Shape::new(vec![1, width]), TensorData::Fp32(values))
    }

    #[tokio::test]
    async fn state_accumulates_across_executions() {
        let runtime = AccumulatorRuntime::new(3, 1);
        let mut request = runtime.create_infer_request(0);

        request.set_input(INPUT_NAME, input(vec![1.0, 2.0, 3.0]));
        runtime.execute(&mut request).await.expect("first execute");
        assert_eq!(
            request.output(OUTPUT_NAME).and_then(Tensor::fp32),
            Some(&[1.0, 2.0, 3.0][..])
        );

        request.clear();
        request.set_input(INPUT_NAME, input(vec![1.0, 1.0, 1.0]));
        runtime.execute(&mut request).await.expect("second execute");
        assert_eq!(
            request.output(OUTPUT_NAME).and_then(Tensor::fp32),
            Some(&[2.0, 3.0, 4.0][..])
        );
    }

    #[tokio::test]
    async fn reset_restores_the_default_state() {
        let runtime = AccumulatorRuntime::new(2, 1);
        let mut request = runtime.create_infer_request(0);

        request.set_input(INPUT_NAME, input(vec![5.0, 5.0]));
        runtime.execute(&mut request).await.expect("execute");

        for state in request.query_states_mut() {
            state.reset();
        }
        request.clear();
        request.set_input(INPUT_NAME, input(vec![1.0, 2.0]));
        runtime.execute(&mut request).await.expect("execute after reset");
        assert_eq!(
            request.output(OUTPUT_NAME).and_then(Tensor::fp32),
            Some(&[1.0, 2.0][..])
        );
    }

    #[tokio::test]
    async fn width_mismatch_is_an_internal_error() {
        let runtime = AccumulatorRuntime::new(4, 1);
        let mut request = runtime.create_infer_request(0);
        request.set_input(INPUT_NAME, input(vec![1.0]));
        assert_eq!(
            runtime.execute(&mut request).await,
            Err(StatusCode::Internal)
        );
    }
}
