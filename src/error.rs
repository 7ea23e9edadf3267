//! Errors on the inference path and their wire status codes.

use thiserror::Error;

use crate::accel::AccelError;
use crate::layout::LayoutError;
use crate::rpc::RequestStatusCode;

pub type Result<T> = std::result::Result<T, InferError>;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("request carries no raw input tensor")]
    MissingInput,

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Device(#[from] AccelError),

    /// The blocking task running the device call did not complete.
    #[error("accelerator task failed: {0}")]
    TaskFailed(String),
}

impl InferError {
    /// Status code reported to the caller.
    pub fn status_code(&self) -> RequestStatusCode {
        match self {
            InferError::MissingInput => RequestStatusCode::InvalidArg,
            InferError::Layout(LayoutError::MalformedPayload { .. }) => {
                RequestStatusCode::InvalidArg
            }
            InferError::Layout(_) => RequestStatusCode::Internal,
            InferError::Device(_) => RequestStatusCode::Internal,
            InferError::TaskFailed(_) => RequestStatusCode::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let malformed = InferError::from(LayoutError::MalformedPayload { len: 7, stride: 60 });
        assert_eq!(malformed.status_code(), RequestStatusCode::InvalidArg);
        assert!(malformed.to_string().contains("7 bytes"));

        let device = InferError::from(AccelError::Device {
            stage: "finish",
            reason: "queue error".into(),
        });
        assert_eq!(device.status_code(), RequestStatusCode::Internal);

        assert_eq!(InferError::MissingInput.status_code(), RequestStatusCode::InvalidArg);
        assert_eq!(
            InferError::TaskFailed("cancelled".into()).status_code(),
            RequestStatusCode::Unavailable
        );
    }
}
