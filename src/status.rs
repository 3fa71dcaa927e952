//! Status codes surfaced across transports.

use axum::http::StatusCode as HttpStatusCode;
use thiserror::Error;
use tonic::Code;

/// The closed status set of the serving core.
///
/// Every operation returns `Result<T, StatusCode>`; transports map a code
/// onto their own vocabulary with [`StatusCode::http`] or the
/// `tonic::Status` conversion.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    #[error("model with requested name is not found")]
    ModelMissing,
    #[error("model with requested version is not found")]
    ModelVersionMissing,
    #[error("model is not ready to serve requests")]
    ModelNotReady,

    #[error("invalid number of inputs")]
    InvalidNoOfInputs,
    #[error("invalid input shape")]
    InvalidShape,
    #[error("invalid input precision")]
    InvalidPrecision,
    #[error("invalid content size of tensor")]
    InvalidContentSize,
    #[error("invalid number of shape dimensions")]
    InvalidNoOfShapeDimensions,
    #[error("special input does not contain tensor shape information")]
    SpecialInputNoTensorShape,

    #[error("sequence id tensor does not carry a single uint64 element")]
    SequenceIdBadType,
    #[error("sequence control tensor does not carry a single uint32 element")]
    SequenceControlInputBadType,
    #[error("unexpected sequence control input value")]
    InvalidSequenceControlInput,
    #[error("sequence id has not been provided")]
    SequenceIdNotProvided,
    #[error("sequence with provided id does not exist")]
    SequenceMissing,
    #[error("sequence with provided id already exists")]
    SequenceAlreadyExists,
    #[error("max sequence number has been reached, could not create new sequence")]
    MaxSequenceNumberReached,

    #[error("deadline exceeded before an infer request slot was available")]
    DeadlineExceeded,
    #[error("internal error")]
    Internal,
}

impl StatusCode {
    /// HTTP status for the REST surface.
    pub fn http(&self) -> HttpStatusCode {
        match self {
            StatusCode::ModelMissing
            | StatusCode::ModelVersionMissing
            | StatusCode::SequenceMissing => HttpStatusCode::NOT_FOUND,
            StatusCode::SequenceAlreadyExists => HttpStatusCode::CONFLICT,
            StatusCode::ModelNotReady | StatusCode::MaxSequenceNumberReached => {
                HttpStatusCode::SERVICE_UNAVAILABLE
            }
            StatusCode::DeadlineExceeded => HttpStatusCode::REQUEST_TIMEOUT,
            StatusCode::Internal => HttpStatusCode::INTERNAL_SERVER_ERROR,
            _ => HttpStatusCode::BAD_REQUEST,
        }
    }

    fn grpc_code(&self) -> Code {
        match self {
            StatusCode::ModelMissing
            | StatusCode::ModelVersionMissing
            | StatusCode::SequenceMissing => Code::NotFound,
            StatusCode::SequenceAlreadyExists => Code::AlreadyExists,
            StatusCode::ModelNotReady => Code::Unavailable,
            StatusCode::MaxSequenceNumberReached => Code::ResourceExhausted,
            StatusCode::DeadlineExceeded => Code::DeadlineExceeded,
            StatusCode::Internal => Code::Internal,
            _ => Code::InvalidArgument,
        }
    }
}

impl From<StatusCode> for tonic::Status {
    fn from(status: StatusCode) -> Self {
        tonic::Status::new(status.grpc_code(), status.to_string())
    }
}
