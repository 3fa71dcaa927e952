//! REST surface coverage: both path families, the metrics endpoint, and the
//! HTTP status mapping.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::{server_state, MODEL_WIDTH, MONITORED_CONFIG};
use tower::ServiceExt;

use seqstream::server::routes::create_router;

fn infer_body(control: u32, sequence_id: u64, datatype: &str) -> String {
    let data = if datatype == "FP32" {
        serde_json::json!(vec![1.0f32; MODEL_WIDTH])
    } else {
        serde_json::json!(vec![1i32; MODEL_WIDTH])
    };
    let mut inputs = vec![
        serde_json::json!({
            "name": "input",
            "shape": [1, MODEL_WIDTH],
            "datatype": datatype,
            "data": data,
        }),
        serde_json::json!({
            "name": "sequence_control_input",
            "shape": [1],
            "datatype": "UINT32",
            "data": [control],
        }),
    ];
    if sequence_id != 0 {
        inputs.push(serde_json::json!({
            "name": "sequence_id",
            "shape": [1],
            "datatype": "UINT64",
            "data": [sequence_id],
        }));
    }
    serde_json::json!({ "inputs": inputs }).to_string()
}

fn post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn kserve_infer_round_trip() {
    let state = server_state(MONITORED_CONFIG).await;
    let router = create_router(state.clone());

    let response = router
        .oneshot(post("/v2/models/dummy/infer", infer_body(1, 0, "FP32")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["model_name"], "dummy");
    assert_eq!(json["model_version"], "1");
    let outputs = json["outputs"].as_array().expect("outputs");
    assert!(outputs.iter().any(|output| output["name"] == "sum"));
    assert!(outputs.iter().any(|output| output["name"] == "sequence_id"));

    // The REST tuple moved, not the gRPC one.
    let collected = state.metrics().collect();
    assert!(collected.contains(
        "ovms_requests_success{api=\"KServe\",interface=\"REST\",method=\"ModelInfer\",name=\"dummy\",version=\"1\"} 1\n"
    ));
    assert!(collected.contains(
        "ovms_requests_success{api=\"KServe\",interface=\"gRPC\",method=\"ModelInfer\",name=\"dummy\",version=\"1\"} 0\n"
    ));
}

#[tokio::test]
async fn tfs_predict_and_status_round_trip() {
    let state = server_state(MONITORED_CONFIG).await;

    let response = create_router(state.clone())
        .oneshot(post("/v1/models/dummy:predict", infer_body(1, 77, "FP32")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let outputs = json["outputs"].as_array().expect("outputs");
    let sequence_id = outputs
        .iter()
        .find(|output| output["name"] == "sequence_id")
        .expect("sequence id output");
    assert_eq!(sequence_id["data"][0], 77);

    let response = create_router(state.clone())
        .oneshot(get("/v1/models/dummy"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["model_version_status"][0]["state"], "AVAILABLE");
}

#[tokio::test]
async fn validation_failures_map_to_bad_request() {
    let state = server_state(MONITORED_CONFIG).await;
    let response = create_router(state.clone())
        .oneshot(post("/v2/models/dummy/infer", infer_body(1, 0, "INT32")))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().expect("message").contains("precision"));
}

#[tokio::test]
async fn missing_model_maps_to_not_found() {
    let state = server_state(MONITORED_CONFIG).await;
    let response = create_router(state.clone())
        .oneshot(get("/v2/models/absent/ready"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ready_and_metadata_endpoints_respond() {
    let state = server_state(MONITORED_CONFIG).await;

    let response = create_router(state.clone())
        .oneshot(get("/v2/models/dummy/ready"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = create_router(state.clone())
        .oneshot(get("/v2/models/dummy"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "dummy");
    let inputs = json["inputs"].as_array().expect("inputs");
    assert_eq!(inputs[0]["datatype"], "FP32");
}

#[tokio::test]
async fn metrics_endpoint_serves_the_exposition() {
    let state = server_state(MONITORED_CONFIG).await;
    let response = create_router(state.clone())
        .oneshot(get("/metrics"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("# TYPE ovms_requests_success counter"));
    assert!(text.contains("# TYPE ovms_request_time_us histogram"));
    assert!(text.contains("ovms_streams{name=\"dummy\",version=\"1\"} 4\n"));
}
