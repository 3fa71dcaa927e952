//! Request validation.
//!
//! Special inputs (`sequence_id`, `sequence_control_input`) are extracted
//! first with their own error ladder, then the remaining inputs are checked
//! against the model's declared metadata with the special names excluded.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::BatchingMode;
use crate::sequence_manager::{SequenceControl, SequenceProcessingSpec};
use crate::status::StatusCode;
use crate::tensor::{InferenceRequest, Shape, Tensor, TensorDesc};

pub const SEQUENCE_ID_INPUT: &str = "sequence_id";
pub const SEQUENCE_CONTROL_INPUT: &str = "sequence_control_input";
pub const SPECIAL_INPUT_NAMES: [&str; 2] = [SEQUENCE_ID_INPUT, SEQUENCE_CONTROL_INPUT];

/// Both special inputs must be one-element tensors of shape `(1)`.
fn validate_special_shape(tensor: &Tensor) -> Result<(), StatusCode> {
    if tensor.shape.rank() == 0 {
        return Err(StatusCode::SpecialInputNoTensorShape);
    }
    if tensor.shape.rank() != 1 {
        return Err(StatusCode::InvalidNoOfShapeDimensions);
    }
    if tensor.shape.dims()[0] != 1 {
        return Err(StatusCode::InvalidShape);
    }
    Ok(())
}

pub fn extract_sequence_id(tensor: &Tensor) -> Result<u64, StatusCode> {
    validate_special_shape(tensor)?;
    tensor.as_scalar_u64().ok_or(StatusCode::SequenceIdBadType)
}

pub fn extract_sequence_control(tensor: &Tensor) -> Result<u32, StatusCode> {
    validate_special_shape(tensor)?;
    tensor
        .as_scalar_u32()
        .ok_or(StatusCode::SequenceControlInputBadType)
}

/// Builds the request's processing spec from the special inputs. Absence of
/// either tensor is allowed and defaults to `(NO_CONTROL_INPUT, 0)`, which is
/// only a valid combination for a start with a server-assigned id.
pub fn validate_special_keys(
    request: &InferenceRequest,
) -> Result<SequenceProcessingSpec, StatusCode> {
    let mut sequence_id = 0u64;
    let mut control_raw = SequenceControl::NO_CONTROL_INPUT;

    if let Some(tensor) = request.inputs.get(SEQUENCE_ID_INPUT) {
        sequence_id = extract_sequence_id(tensor)?;
    }
    if let Some(tensor) = request.inputs.get(SEQUENCE_CONTROL_INPUT) {
        control_raw = extract_sequence_control(tensor)?;
    }

    let control = SequenceControl::from_u32(control_raw)?;
    if control != SequenceControl::Start && sequence_id == 0 {
        return Err(StatusCode::SequenceIdNotProvided);
    }
    Ok(SequenceProcessingSpec::new(control, sequence_id))
}

/// Checks the request against the model's declared inputs. Special inputs
/// are never counted against the declared set.
pub fn validate(
    request: &InferenceRequest,
    inputs_info: &BTreeMap<String, TensorDesc>,
    special_input_names: &[&str],
    batching_mode: BatchingMode,
    shape_overrides: &BTreeMap<String, Shape>,
) -> Result<(), StatusCode> {
    let provided = request
        .inputs
        .keys()
        .filter(|name| !special_input_names.contains(&name.as_str()))
        .count();
    if provided != inputs_info.len() {
        debug!(
            model = %request.model_name,
            expected = inputs_info.len(),
            provided,
            "invalid number of inputs"
        );
        return Err(StatusCode::InvalidNoOfInputs);
    }

    let skip_batch = batching_mode == BatchingMode::Auto;
    for (name, info) in inputs_info {
        let tensor = request
            .inputs
            .get(name)
            .ok_or(StatusCode::InvalidNoOfInputs)?;
        let declared = shape_overrides.get(name).unwrap_or(&info.shape);
        if !declared.matches(&tensor.shape, skip_batch) {
            debug!(
                model = %request.model_name,
                input = %name,
                expected = ?declared.dims(),
                actual = ?tensor.shape.dims(),
                "invalid input shape"
            );
            return Err(StatusCode::InvalidShape);
        }
        if tensor.precision() != info.precision {
            debug!(
                model = %request.model_name,
                input = %name,
                expected = info.precision.as_str(),
                actual = tensor.precision().as_str(),
                "invalid input precision"
            );
            return Err(StatusCode::InvalidPrecision);
        }
        match tensor.shape.element_count() {
            Some(count) if count == tensor.data.len() => {}
            _ => return Err(StatusCode::InvalidContentSize),
        }
    }
    Ok(())
}
