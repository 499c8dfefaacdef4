use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use crate::pipeline::{ErrorKind, PipelineError};

use super::protocol::ErrorBody;

/// A pipeline error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

/// HTTP status for each pipeline error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::EmptyConversation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::DimensionMismatch | ErrorKind::IndexMismatch | ErrorKind::StorageFailure => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(kind = %kind, "request failed: {}", self.0);
        } else {
            warn!(kind = %kind, "request rejected: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: kind.as_str().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
