use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use medialift_protocol::{ErrorBody, ErrorCode};
use medialift_store::StoreError;

/// Failure surface of every handler, rendered as a JSON [`ErrorBody`] with a
/// machine-readable code so clients branch on the code instead of sniffing
/// message text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown upload {0}")]
    UnknownUpload(String),

    /// Finalize was asked for an upload with gaps; the body names every
    /// missing index so the client can resend exactly those.
    #[error("upload {file_id} is missing {} chunk(s)", missing.len())]
    IncompleteUpload { file_id: String, missing: Vec<u32> },

    #[error("chunk exceeds the {limit}-byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownUpload(id) => Self::UnknownUpload(id),
            StoreError::MissingChunks { file_id, missing } => {
                Self::IncompleteUpload { file_id, missing }
            }
            e @ StoreError::IndexOutOfRange { .. } => Self::InvalidRequest(e.to_string()),
            e @ StoreError::Io(_) => Self::Storage(e),
            StoreError::Json(e) => Self::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownUpload(_) => StatusCode::NOT_FOUND,
            Self::IncompleteUpload { .. } => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::UnknownUpload(_) => ErrorCode::UnknownUpload,
            Self::IncompleteUpload { .. } => ErrorCode::IncompleteUpload,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Storage(_) => ErrorCode::Storage,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }
        let missing_chunks = match &self {
            Self::IncompleteUpload { missing, .. } => Some(missing.clone()),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            missing_chunks,
        };
        (status, Json(body)).into_response()
    }
}
