//! Stateful request lifecycle, end to end through the service surfaces.

mod common;

use common::{
    response_sequence_id, server_state, stateful_request, MODEL_WIDTH, MONITORED_CONFIG,
};
use seqstream::api::grpc::PredictionService;
use seqstream::sequence_manager::SequenceControl;
use seqstream::tensor::{InferenceRequest, Tensor};
use seqstream::validation::{SEQUENCE_CONTROL_INPUT, SEQUENCE_ID_INPUT};

#[tokio::test]
async fn start_continue_end_round_trip() {
    let state = server_state(MONITORED_CONFIG).await;
    let service = PredictionService::new(state.clone());
    let instance = state.instance("dummy", None).await.expect("model loaded");
    let sequences_before = instance.sequence_manager().sequence_count().await;

    let started = service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_START,
            0,
            vec![1.0; MODEL_WIDTH],
        ))
        .await
        .expect("start");
    let id = response_sequence_id(&started);
    assert_ne!(id, 0);

    for round in 1..=3u32 {
        let response = service
            .predict(&stateful_request(
                SequenceControl::NO_CONTROL_INPUT,
                id,
                vec![1.0; MODEL_WIDTH],
            ))
            .await
            .expect("continue");
        assert_eq!(response_sequence_id(&response), id);
        let expected = 1.0 + round as f32;
        assert_eq!(
            response.outputs["sum"].fp32(),
            Some(&[expected; MODEL_WIDTH][..])
        );
    }

    service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_END,
            id,
            vec![0.0; MODEL_WIDTH],
        ))
        .await
        .expect("end");

    // Round trip leaves the manager as it was found.
    assert_eq!(
        instance.sequence_manager().sequence_count().await,
        sequences_before
    );

    let after_end = service
        .predict(&stateful_request(
            SequenceControl::NO_CONTROL_INPUT,
            id,
            vec![1.0; MODEL_WIDTH],
        ))
        .await
        .expect_err("sequence is gone");
    assert_eq!(after_end.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let state = server_state(MONITORED_CONFIG).await;
    let service = PredictionService::new(state.clone());

    service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_START,
            11,
            vec![1.0; MODEL_WIDTH],
        ))
        .await
        .expect("first start");
    let second = service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_START,
            11,
            vec![1.0; MODEL_WIDTH],
        ))
        .await
        .expect_err("second start");
    assert_eq!(second.code(), tonic::Code::AlreadyExists);
}

#[tokio::test]
async fn continue_without_sequence_id_is_rejected() {
    let state = server_state(MONITORED_CONFIG).await;
    let service = PredictionService::new(state.clone());
    let status = service
        .predict(&stateful_request(
            SequenceControl::NO_CONTROL_INPUT,
            0,
            vec![1.0; MODEL_WIDTH],
        ))
        .await
        .expect_err("id required");
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("sequence id"));
}

#[tokio::test]
async fn unknown_control_value_is_rejected() {
    let state = server_state(MONITORED_CONFIG).await;
    let service = PredictionService::new(state.clone());
    let request = InferenceRequest::new("dummy")
        .with_input("input", common::fp32_input(vec![1.0; MODEL_WIDTH]))
        .with_input(SEQUENCE_ID_INPUT, Tensor::scalar_u64(4))
        .with_input(SEQUENCE_CONTROL_INPUT, Tensor::scalar_u32(17));
    let status = service.predict(&request).await.expect_err("bad control");
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn sequence_capacity_is_enforced() {
    let state = server_state(
        r#"{"model_config_list": [{"config": {
            "name": "dummy", "stateful": true, "max_sequence_number": 2,
            "shape": {"input": [1, 10]}
        }}]}"#,
    )
    .await;
    let service = PredictionService::new(state.clone());

    for id in [21, 22] {
        service
            .predict(&stateful_request(
                SequenceControl::SEQUENCE_START,
                id,
                vec![0.0; MODEL_WIDTH],
            ))
            .await
            .expect("under the cap");
    }
    let over = service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_START,
            23,
            vec![0.0; MODEL_WIDTH],
        ))
        .await
        .expect_err("over the cap");
    assert_eq!(over.code(), tonic::Code::ResourceExhausted);

    // Ending a sequence frees a slot.
    service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_END,
            21,
            vec![0.0; MODEL_WIDTH],
        ))
        .await
        .expect("end");
    service
        .predict(&stateful_request(
            SequenceControl::SEQUENCE_START,
            23,
            vec![0.0; MODEL_WIDTH],
        ))
        .await
        .expect("slot freed");
}

#[tokio::test]
async fn missing_model_and_version_are_not_found() {
    let state = server_state(MONITORED_CONFIG).await;
    let service = PredictionService::new(state.clone());

    let missing = service
        .predict(&InferenceRequest::new("unknown"))
        .await
        .expect_err("unknown model");
    assert_eq!(missing.code(), tonic::Code::NotFound);

    let request = stateful_request(SequenceControl::SEQUENCE_START, 0, vec![1.0; MODEL_WIDTH])
        .with_version(9);
    let wrong_version = service.predict(&request).await.expect_err("bad version");
    assert_eq!(wrong_version.code(), tonic::Code::NotFound);
}
