//! Tensor model and request/response envelopes.

use std::collections::BTreeMap;

/// Element precision of a tensor, carried on the wire as the KServe
/// datatype strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Fp32,
    I64,
    I32,
    I8,
    U64,
    U32,
    U8,
    Bool,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Fp32 => "FP32",
            Precision::I64 => "INT64",
            Precision::I32 => "INT32",
            Precision::I8 => "INT8",
            Precision::U64 => "UINT64",
            Precision::U32 => "UINT32",
            Precision::U8 => "UINT8",
            Precision::Bool => "BOOL",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "FP32" => Some(Precision::Fp32),
            "INT64" => Some(Precision::I64),
            "INT32" => Some(Precision::I32),
            "INT8" => Some(Precision::I8),
            "UINT64" => Some(Precision::U64),
            "UINT32" => Some(Precision::U32),
            "UINT8" => Some(Precision::U8),
            "BOOL" => Some(Precision::Bool),
            _ => None,
        }
    }
}

/// Tensor dimensions. Declared shapes may carry `-1` wildcards; concrete
/// request shapes are fully specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape(Vec<i64>);

impl Shape {
    pub fn new(dims: Vec<i64>) -> Self {
        Shape(dims)
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total element count, or `None` when any dimension is a wildcard.
    pub fn element_count(&self) -> Option<usize> {
        let mut count: usize = 1;
        for &dim in &self.0 {
            if dim < 0 {
                return None;
            }
            count = count.checked_mul(dim as usize)?;
        }
        Some(count)
    }

    /// Whether a concrete shape satisfies this declared shape. `-1` entries
    /// match any size; with `skip_batch` the first dimension is not compared.
    pub fn matches(&self, concrete: &Shape, skip_batch: bool) -> bool {
        if self.rank() != concrete.rank() {
            return false;
        }
        self.0
            .iter()
            .zip(concrete.0.iter())
            .enumerate()
            .all(|(axis, (declared, actual))| {
                *declared == -1 || (skip_batch && axis == 0) || declared == actual
            })
    }
}

/// Shape and precision of a declared model input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    pub shape: Shape,
    pub precision: Precision,
}

impl TensorDesc {
    pub fn new(shape: Shape, precision: Precision) -> Self {
        TensorDesc { shape, precision }
    }
}

/// Typed tensor payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Fp32(Vec<f32>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    U64(Vec<u64>),
    U32(Vec<u32>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

impl TensorData {
    pub fn precision(&self) -> Precision {
        match self {
            TensorData::Fp32(_) => Precision::Fp32,
            TensorData::I64(_) => Precision::I64,
            TensorData::I32(_) => Precision::I32,
            TensorData::I8(_) => Precision::I8,
            TensorData::U64(_) => Precision::U64,
            TensorData::U32(_) => Precision::U32,
            TensorData::U8(_) => Precision::U8,
            TensorData::Bool(_) => Precision::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Fp32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::U64(v) => v.len(),
            TensorData::U32(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A concrete tensor: shape plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Shape,
    pub data: TensorData,
}

impl Tensor {
    pub fn new(shape: Shape, data: TensorData) -> Self {
        Tensor { shape, data }
    }

    /// Convenience constructor for a one-element `uint64` tensor of shape `(1)`.
    pub fn scalar_u64(value: u64) -> Self {
        Tensor::new(Shape::new(vec![1]), TensorData::U64(vec![value]))
    }

    /// Convenience constructor for a one-element `uint32` tensor of shape `(1)`.
    pub fn scalar_u32(value: u32) -> Self {
        Tensor::new(Shape::new(vec![1]), TensorData::U32(vec![value]))
    }

    pub fn precision(&self) -> Precision {
        self.data.precision()
    }

    pub fn desc(&self) -> TensorDesc {
        TensorDesc::new(self.shape.clone(), self.precision())
    }

    /// The single `u64` element, when the payload is exactly that.
    pub fn as_scalar_u64(&self) -> Option<u64> {
        match &self.data {
            TensorData::U64(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// The single `u32` element, when the payload is exactly that.
    pub fn as_scalar_u32(&self) -> Option<u32> {
        match &self.data {
            TensorData::U32(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    pub fn fp32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::Fp32(v) => Some(v),
            _ => None,
        }
    }
}

/// A validated-shape-agnostic inference request handed over by a transport.
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub model_name: String,
    pub model_version: Option<u64>,
    pub inputs: BTreeMap<String, Tensor>,
}

impl InferenceRequest {
    pub fn new(model_name: impl Into<String>) -> Self {
        InferenceRequest {
            model_name: model_name.into(),
            model_version: None,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.model_version = Some(version);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.inputs.insert(name.into(), tensor);
        self
    }
}

/// Serialized inference outputs returned to the transport.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub model_name: String,
    pub model_version: u64,
    pub outputs: BTreeMap<String, Tensor>,
}
