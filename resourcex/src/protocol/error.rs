//! The error envelope of the wire protocol: stable code strings plus the
//! kind-to-status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::core::errors::{ResourceXError, kind_of};

pub mod codes {
    pub const LOCATOR_REQUIRED: &str = "LOCATOR_REQUIRED";
    pub const MANIFEST_REQUIRED: &str = "MANIFEST_REQUIRED";
    pub const CONTENT_REQUIRED: &str = "CONTENT_REQUIRED";
    pub const INVALID_LOCATOR: &str = "INVALID_LOCATOR";
    pub const INVALID_MANIFEST: &str = "INVALID_MANIFEST";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const VERSION_EXISTS: &str = "VERSION_EXISTS";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
}

/// The JSON body of every non-stream error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// An error ready to be sent over the wire. Handlers return this; its
/// response never leaks internals beyond the envelope message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::RESOURCE_NOT_FOUND, message)
    }
}

/// Map an operation failure to its wire form via the stable taxonomy.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        match kind_of(&err) {
            Some(kind) if kind.is_invalid_locator() => {
                Self::bad_request(codes::INVALID_LOCATOR, message)
            }
            Some(ResourceXError::ResourceNotFound { .. }) => Self::not_found(message),
            Some(ResourceXError::CorruptArchive { .. }) => {
                Self::bad_request(codes::INVALID_MANIFEST, message)
            }
            Some(ResourceXError::CorruptState { .. } | ResourceXError::StorageIo { .. }) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::STORAGE_ERROR, message)
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL_ERROR, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code.to_string(),
        };
        (self.status, Json(body)).into_response()
    }
}
