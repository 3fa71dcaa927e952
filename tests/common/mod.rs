//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use seqstream::config::{load_config, ServerConfig};
use seqstream::server::ServerState;
use seqstream::tensor::{InferenceRequest, Shape, Tensor, TensorData};
use seqstream::validation::{SEQUENCE_CONTROL_INPUT, SEQUENCE_ID_INPUT};

pub const MODEL_NAME: &str = "dummy";
pub const MODEL_WIDTH: usize = 10;

/// Config enabling every metric family, with the reference model sized the
/// way the metric assertions expect (nireq 2, four execution streams).
pub const MONITORED_CONFIG: &str = r#"{
    "monitoring": {
        "metrics": {
            "enable": true,
            "metrics_list": [
                "ovms_infer_req_queue_size",
                "ovms_infer_req_active",
                "ovms_current_requests",
                "ovms_requests_success",
                "ovms_requests_fail",
                "ovms_request_time_us",
                "ovms_streams",
                "ovms_inference_time_us",
                "ovms_wait_for_infer_req_time_us"
            ]
        }
    },
    "model_config_list": [
        {"config": {
            "name": "dummy",
            "base_path": "/models/dummy",
            "nireq": 2,
            "plugin_config": {"CPU_THROUGHPUT_STREAMS": 4},
            "stateful": true,
            "shape": {"input": [1, 10]}
        }}
    ]
}"#;

pub fn parse_config(contents: &str) -> ServerConfig {
    let mut file = tempfile::NamedTempFile::new().expect("temp config file");
    file.write_all(contents.as_bytes()).expect("write config");
    load_config(file.path()).expect("config should load")
}

pub async fn server_state(contents: &str) -> Arc<ServerState> {
    server_state_with_idle(contents, Duration::from_secs(60)).await
}

pub async fn server_state_with_idle(contents: &str, max_idle: Duration) -> Arc<ServerState> {
    ServerState::new(&parse_config(contents), Duration::from_secs(5), max_idle)
        .await
        .expect("server state")
}

pub fn fp32_input(values: Vec<f32>) -> Tensor {
    let width = values.len() as i64;
    Tensor::new(Shape::new(vec![1, width]), TensorData::Fp32(values))
}

/// A valid stateful request for the reference model. A zero `sequence_id`
/// leaves the tensor out so the server assigns one on start.
pub fn stateful_request(control: u32, sequence_id: u64, values: Vec<f32>) -> InferenceRequest {
    let mut request = InferenceRequest::new(MODEL_NAME)
        .with_input("input", fp32_input(values))
        .with_input(SEQUENCE_CONTROL_INPUT, Tensor::scalar_u32(control));
    if sequence_id != 0 {
        request = request.with_input(SEQUENCE_ID_INPUT, Tensor::scalar_u64(sequence_id));
    }
    request
}

/// Same request with an integer payload, tripping the precision check.
pub fn wrong_precision_request(control: u32, sequence_id: u64) -> InferenceRequest {
    let mut request = InferenceRequest::new(MODEL_NAME)
        .with_input(
            "input",
            Tensor::new(
                Shape::new(vec![1, MODEL_WIDTH as i64]),
                TensorData::I32(vec![0; MODEL_WIDTH]),
            ),
        )
        .with_input(SEQUENCE_CONTROL_INPUT, Tensor::scalar_u32(control));
    if sequence_id != 0 {
        request = request.with_input(SEQUENCE_ID_INPUT, Tensor::scalar_u64(sequence_id));
    }
    request
}

pub fn response_sequence_id(response: &seqstream::tensor::InferenceResponse) -> u64 {
    response.outputs[SEQUENCE_ID_INPUT]
        .as_scalar_u64()
        .expect("response carries the sequence id")
}
