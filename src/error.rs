use std::io;
use std::path::PathBuf;
use thiserror::Error;
use warp::http::StatusCode;

/// Errors surfaced to HTTP clients as `{"error": <message>}`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("Invalid payload")]
    InvalidPayload,
    #[error("Out of range")]
    OutOfRange,
    #[error("userId required")]
    MissingUserId,
    #[error("Payload too large")]
    PayloadTooLarge,
    #[error("Not found")]
    NotFound,
    #[error("CORS request forbidden")]
    CorsForbidden,
}

// Lets body and payload filters reject with the reply they want.
impl warp::reject::Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload | ApiError::OutOfRange | ApiError::MissingUserId => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::CorsForbidden => StatusCode::FORBIDDEN,
        }
    }
}

/// Failures of the backing file. Never reach HTTP clients: reads fall back
/// to an empty collection, writes are logged and reported as `false`.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}
