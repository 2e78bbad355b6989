//! Typed errors returned across the library seams.

use thiserror::Error;

use crate::common::messages::CodeStatus;

/// Failure talking to the remote game API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 429 from the provider
    #[error("rate limited by provider")]
    RateLimited,

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The provider answered but refused the request
    #[error("rejected: {message} (err_code {err_code:?})")]
    Rejected {
        message: String,
        err_code: Option<i64>,
    },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Failure reading or writing the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("illegal status transition for '{code}': {from} -> {to}")]
    IllegalTransition {
        code: String,
        from: CodeStatus,
        to: CodeStatus,
    },

    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure loading or running the CAPTCHA classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("model artifact missing: {0}")]
    MissingArtifact(String),

    #[error("invalid model metadata: {0}")]
    Metadata(String),

    #[error("image decode: {0}")]
    Image(#[from] image::ImageError),

    #[error("inference: {0}")]
    Inference(String),
}

/// Reasons a group run refuses to start.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a redemption run is already active for group {0}")]
    RunInProgress(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}
