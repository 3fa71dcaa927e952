//! Endpoint label vocabulary shared by transports and metrics.

pub mod grpc;

/// Serving API surface a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    TensorFlowServing,
    KServe,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::TensorFlowServing => "TensorFlowServing",
            Api::KServe => "KServe",
        }
    }
}

/// Transport interface a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Grpc,
    Rest,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Grpc => "gRPC",
            Interface::Rest => "REST",
        }
    }

    pub const ALL: [Interface; 2] = [Interface::Grpc, Interface::Rest];
}

/// RPC method vocabulary across both API surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Predict,
    GetModelMetadata,
    GetModelStatus,
    ModelInfer,
    ModelMetadata,
    ModelReady,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Predict => "Predict",
            Method::GetModelMetadata => "GetModelMetadata",
            Method::GetModelStatus => "GetModelStatus",
            Method::ModelInfer => "ModelInfer",
            Method::ModelMetadata => "ModelMetadata",
            Method::ModelReady => "ModelReady",
        }
    }

    pub fn api(&self) -> Api {
        match self {
            Method::Predict | Method::GetModelMetadata | Method::GetModelStatus => {
                Api::TensorFlowServing
            }
            Method::ModelInfer | Method::ModelMetadata | Method::ModelReady => Api::KServe,
        }
    }

    /// `ModelReady` and `GetModelStatus` tuples carry no version label.
    pub fn has_version_label(&self) -> bool {
        !matches!(self, Method::ModelReady | Method::GetModelStatus)
    }

    pub const ALL: [Method; 6] = [
        Method::Predict,
        Method::GetModelMetadata,
        Method::GetModelStatus,
        Method::ModelInfer,
        Method::ModelMetadata,
        Method::ModelReady,
    ];
}

/// Label tuple attached to a single request's metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub interface: Interface,
    pub method: Method,
}

impl ExecutionContext {
    pub fn new(interface: Interface, method: Method) -> Self {
        ExecutionContext { interface, method }
    }

    pub fn api(&self) -> Api {
        self.method.api()
    }
}
