//! REST surface and metrics endpoint.
//!
//! Thin adapters between the JSON tensor envelope and the core request
//! types. Both API path families are served: TensorFlow-Serving style under
//! `/v1` (verb carried after a colon in the final path segment) and KServe
//! v2 under `/v2`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::{ExecutionContext, Interface, Method};
use crate::server::ServerState;
use crate::status::StatusCode;
use crate::tensor::{
    InferenceRequest, InferenceResponse, Precision, Shape, Tensor, TensorData, TensorDesc,
};

pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/v1/models/:spec", get(tfs_get).post(tfs_predict))
        .route(
            "/v1/models/:name/versions/:spec",
            get(tfs_get_versioned).post(tfs_predict_versioned),
        )
        .route("/v2/models/:name", get(kserve_metadata))
        .route("/v2/models/:name/ready", get(kserve_ready))
        .route("/v2/models/:name/infer", post(kserve_infer))
        .route(
            "/v2/models/:name/versions/:version",
            get(kserve_metadata_versioned),
        )
        .route(
            "/v2/models/:name/versions/:version/ready",
            get(kserve_ready_versioned),
        )
        .route(
            "/v2/models/:name/versions/:version/infer",
            post(kserve_infer_versioned),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode) -> Response {
    (
        status.http(),
        Json(ErrorBody {
            error: status.to_string(),
        }),
    )
        .into_response()
}

async fn metrics(State(state): State<Arc<ServerState>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics().collect(),
    )
        .into_response()
}

// ---- JSON tensor envelope ----

#[derive(Debug, Deserialize)]
struct InferTensorJson {
    name: String,
    shape: Vec<i64>,
    datatype: String,
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InferRequestJson {
    #[serde(default)]
    inputs: Vec<InferTensorJson>,
}

#[derive(Debug, Serialize)]
struct OutputTensorJson {
    name: String,
    shape: Vec<i64>,
    datatype: &'static str,
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct InferResponseJson {
    model_name: String,
    model_version: String,
    outputs: Vec<OutputTensorJson>,
}

fn parse_tensor(json: &InferTensorJson) -> Result<Tensor, StatusCode> {
    let precision =
        Precision::from_str(&json.datatype).ok_or(StatusCode::InvalidPrecision)?;
    let data = match precision {
        Precision::Fp32 => TensorData::Fp32(collect(&json.data, |v| {
            v.as_f64().map(|value| value as f32)
        })?),
        Precision::I64 => TensorData::I64(collect(&json.data, serde_json::Value::as_i64)?),
        Precision::I32 => TensorData::I32(collect(&json.data, |v| {
            v.as_i64().map(|value| value as i32)
        })?),
        Precision::I8 => TensorData::I8(collect(&json.data, |v| {
            v.as_i64().map(|value| value as i8)
        })?),
        Precision::U64 => TensorData::U64(collect(&json.data, serde_json::Value::as_u64)?),
        Precision::U32 => TensorData::U32(collect(&json.data, |v| {
            v.as_u64().map(|value| value as u32)
        })?),
        Precision::U8 => TensorData::U8(collect(&json.data, |v| {
            v.as_u64().map(|value| value as u8)
        })?),
        Precision::Bool => TensorData::Bool(collect(&json.data, serde_json::Value::as_bool)?),
    };
    Ok(Tensor::new(Shape::new(json.shape.clone()), data))
}

fn collect<T>(
    values: &[serde_json::Value],
    convert: impl Fn(&serde_json::Value) -> Option<T>,
) -> Result<Vec<T>, StatusCode> {
    values
        .iter()
        .map(|value| convert(value).ok_or(StatusCode::InvalidContentSize))
        .collect()
}

fn tensor_to_json(name: &str, tensor: &Tensor) -> OutputTensorJson {
    let data = match &tensor.data {
        TensorData::Fp32(v) => serde_json::json!(v),
        TensorData::I64(v) => serde_json::json!(v),
        TensorData::I32(v) => serde_json::json!(v),
        TensorData::I8(v) => serde_json::json!(v),
        TensorData::U64(v) => serde_json::json!(v),
        TensorData::U32(v) => serde_json::json!(v),
        TensorData::U8(v) => serde_json::json!(v),
        TensorData::Bool(v) => serde_json::json!(v),
    };
    OutputTensorJson {
        name: name.to_string(),
        shape: tensor.shape.dims().to_vec(),
        datatype: tensor.precision().as_str(),
        data,
    }
}

fn build_request(
    model_name: &str,
    version: Option<u64>,
    body: &InferRequestJson,
) -> Result<InferenceRequest, StatusCode> {
    let mut request = InferenceRequest::new(model_name);
    request.model_version = version;
    for input in &body.inputs {
        request.inputs.insert(input.name.clone(), parse_tensor(input)?);
    }
    Ok(request)
}

fn response_to_json(response: &InferenceResponse) -> InferResponseJson {
    InferResponseJson {
        model_name: response.model_name.clone(),
        model_version: response.model_version.to_string(),
        outputs: response
            .outputs
            .iter()
            .map(|(name, tensor)| tensor_to_json(name, tensor))
            .collect(),
    }
}

// ---- TensorFlow-Serving paths ----

/// Splits `dummy:predict` into the model name and the verb.
fn split_tfs_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once(':') {
        Some((name, verb)) => (name, Some(verb)),
        None => (spec, None),
    }
}

fn parse_version(raw: &str) -> Result<u64, StatusCode> {
    raw.parse().map_err(|_| StatusCode::ModelVersionMissing)
}

async fn tfs_dispatch_get(
    state: Arc<ServerState>,
    spec: String,
    version: Option<u64>,
) -> Response {
    let (name, verb) = split_tfs_spec(&spec);
    match verb {
        None | Some("status") => tfs_status(state, name, version).await,
        Some("metadata") => {
            let ctx = ExecutionContext::new(Interface::Rest, Method::GetModelMetadata);
            model_metadata(state, name, version, ctx).await
        }
        Some(_) => error_response(StatusCode::ModelMissing),
    }
}

async fn tfs_status(state: Arc<ServerState>, name: &str, version: Option<u64>) -> Response {
    let instance = match state.instance(name, version).await {
        Ok(instance) => instance,
        Err(status) => return error_response(status),
    };
    let ctx = ExecutionContext::new(Interface::Rest, Method::GetModelStatus);
    let version_state = instance.status(ctx);
    Json(serde_json::json!({
        "model_version_status": [{
            "version": instance.version().to_string(),
            "state": version_state.as_str(),
        }]
    }))
    .into_response()
}

async fn model_metadata(
    state: Arc<ServerState>,
    name: &str,
    version: Option<u64>,
    ctx: ExecutionContext,
) -> Response {
    let instance = match state.instance(name, version).await {
        Ok(instance) => instance,
        Err(status) => return error_response(status),
    };
    match instance.metadata(ctx) {
        Ok(metadata) => {
            let describe = |tensors: &std::collections::BTreeMap<String, TensorDesc>| {
                tensors
                    .iter()
                    .map(|(name, desc)| {
                        serde_json::json!({
                            "name": name,
                            "datatype": desc.precision.as_str(),
                            "shape": desc.shape.dims(),
                        })
                    })
                    .collect::<Vec<_>>()
            };
            Json(serde_json::json!({
                "name": metadata.name,
                "versions": [metadata.version.to_string()],
                "inputs": describe(&metadata.inputs),
                "outputs": describe(&metadata.outputs),
            }))
            .into_response()
        }
        Err(status) => error_response(status),
    }
}

async fn tfs_get(State(state): State<Arc<ServerState>>, Path(spec): Path<String>) -> Response {
    tfs_dispatch_get(state, spec, None).await
}

async fn tfs_get_versioned(
    State(state): State<Arc<ServerState>>,
    Path((name, spec)): Path<(String, String)>,
) -> Response {
    let (version_raw, verb) = split_tfs_spec(&spec);
    let version = match parse_version(version_raw) {
        Ok(version) => version,
        Err(status) => return error_response(status),
    };
    let rejoined = match verb {
        Some(verb) => format!("{name}:{verb}"),
        None => name,
    };
    tfs_dispatch_get(state, rejoined, Some(version)).await
}

async fn run_infer(
    state: Arc<ServerState>,
    name: &str,
    version: Option<u64>,
    body: InferRequestJson,
    method: Method,
) -> Response {
    let instance = match state.instance(name, version).await {
        Ok(instance) => instance,
        Err(status) => return error_response(status),
    };
    let request = match build_request(name, version, &body) {
        Ok(request) => request,
        Err(status) => return error_response(status),
    };
    let ctx = ExecutionContext::new(Interface::Rest, method);
    match instance.infer(ctx, &request).await {
        Ok(response) => Json(response_to_json(&response)).into_response(),
        Err(status) => error_response(status),
    }
}

async fn tfs_predict(
    State(state): State<Arc<ServerState>>,
    Path(spec): Path<String>,
    Json(body): Json<InferRequestJson>,
) -> Response {
    let (name, verb) = split_tfs_spec(&spec);
    if verb != Some("predict") {
        return error_response(StatusCode::ModelMissing);
    }
    run_infer(state, name, None, body, Method::Predict).await
}

async fn tfs_predict_versioned(
    State(state): State<Arc<ServerState>>,
    Path((name, spec)): Path<(String, String)>,
    Json(body): Json<InferRequestJson>,
) -> Response {
    let (version_raw, verb) = split_tfs_spec(&spec);
    if verb != Some("predict") {
        return error_response(StatusCode::ModelMissing);
    }
    match parse_version(version_raw) {
        Ok(version) => run_infer(state, &name, Some(version), body, Method::Predict).await,
        Err(status) => error_response(status),
    }
}

// ---- KServe v2 paths ----

async fn kserve_metadata(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Response {
    let ctx = ExecutionContext::new(Interface::Rest, Method::ModelMetadata);
    model_metadata(state, &name, None, ctx).await
}

async fn kserve_metadata_versioned(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    let ctx = ExecutionContext::new(Interface::Rest, Method::ModelMetadata);
    match parse_version(&version) {
        Ok(version) => model_metadata(state, &name, Some(version), ctx).await,
        Err(status) => error_response(status),
    }
}

async fn kserve_ready_inner(
    state: Arc<ServerState>,
    name: &str,
    version: Option<u64>,
) -> Response {
    let instance = match state.instance(name, version).await {
        Ok(instance) => instance,
        Err(status) => return error_response(status),
    };
    let ctx = ExecutionContext::new(Interface::Rest, Method::ModelReady);
    if instance.ready(ctx) {
        axum::http::StatusCode::OK.into_response()
    } else {
        error_response(StatusCode::ModelNotReady)
    }
}

async fn kserve_ready(State(state): State<Arc<ServerState>>, Path(name): Path<String>) -> Response {
    kserve_ready_inner(state, &name, None).await
}

async fn kserve_ready_versioned(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    match parse_version(&version) {
        Ok(version) => kserve_ready_inner(state, &name, Some(version)).await,
        Err(status) => error_response(status),
    }
}

async fn kserve_infer(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(body): Json<InferRequestJson>,
) -> Response {
    run_infer(state, &name, None, body, Method::ModelInfer).await
}

async fn kserve_infer_versioned(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
    Json(body): Json<InferRequestJson>,
) -> Response {
    match parse_version(&version) {
        Ok(version) => run_infer(state, &name, Some(version), body, Method::ModelInfer).await,
        Err(status) => error_response(status),
    }
}
