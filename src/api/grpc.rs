//! In-process gRPC service surfaces.
//!
//! Wire transport and protobuf codecs live outside the core; these services
//! expose the gRPC method vocabulary over the native request types and are
//! driven directly, the way a transport layer would dispatch onto them.

use std::sync::Arc;

use tonic::Status;

use crate::api::{ExecutionContext, Interface, Method};
use crate::instance::{ModelMetadata, ModelVersionState};
use crate::server::ServerState;
use crate::tensor::{InferenceRequest, InferenceResponse};

/// TensorFlow-Serving-compatible surface: `Predict`, `GetModelMetadata`,
/// `GetModelStatus`.
pub struct PredictionService {
    state: Arc<ServerState>,
}

impl PredictionService {
    pub fn new(state: Arc<ServerState>) -> Self {
        PredictionService { state }
    }

    pub async fn predict(&self, request: &InferenceRequest) -> Result<InferenceResponse, Status> {
        let instance = self
            .state
            .instance(&request.model_name, request.model_version)
            .await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::Predict);
        Ok(instance.infer(ctx, request).await?)
    }

    pub async fn get_model_metadata(
        &self,
        name: &str,
        version: Option<u64>,
    ) -> Result<ModelMetadata, Status> {
        let instance = self.state.instance(name, version).await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::GetModelMetadata);
        Ok(instance.metadata(ctx)?)
    }

    pub async fn get_model_status(
        &self,
        name: &str,
        version: Option<u64>,
    ) -> Result<ModelVersionState, Status> {
        let instance = self.state.instance(name, version).await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::GetModelStatus);
        Ok(instance.status(ctx))
    }
}

/// KServe v2 surface: `ModelInfer`, `ModelMetadata`, `ModelReady`.
pub struct KServeInferenceService {
    state: Arc<ServerState>,
}

impl KServeInferenceService {
    pub fn new(state: Arc<ServerState>) -> Self {
        KServeInferenceService { state }
    }

    pub async fn model_infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, Status> {
        let instance = self
            .state
            .instance(&request.model_name, request.model_version)
            .await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::ModelInfer);
        Ok(instance.infer(ctx, request).await?)
    }

    pub async fn model_metadata(
        &self,
        name: &str,
        version: Option<u64>,
    ) -> Result<ModelMetadata, Status> {
        let instance = self.state.instance(name, version).await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::ModelMetadata);
        Ok(instance.metadata(ctx)?)
    }

    pub async fn model_ready(&self, name: &str, version: Option<u64>) -> Result<bool, Status> {
        let instance = self.state.instance(name, version).await?;
        let ctx = ExecutionContext::new(Interface::Grpc, Method::ModelReady);
        Ok(instance.ready(ctx))
    }
}
