use thiserror::Error;

/// Errors produced while decoding frames or validating connection parameters.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("device_id required")]
    MissingDeviceId,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope must be a JSON object")]
    NotAnObject,

    #[error("frame is not valid UTF-8")]
    NotUtf8,
}
