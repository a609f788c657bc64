use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_core::CadenceError;
use tracing::{error, warn};

/// A [`CadenceError`] on its way out as an HTTP response.
///
/// The body is always `{"error": <kind>, "message": <text>}`.
#[derive(Debug)]
pub struct ApiError(pub CadenceError);

impl From<CadenceError> for ApiError {
    fn from(err: CadenceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// HTTP status for the error kind.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CadenceError::Validation(_) | CadenceError::Gating(_) => StatusCode::BAD_REQUEST,
            CadenceError::NotFound(_) => StatusCode::NOT_FOUND,
            CadenceError::InvalidTransition { .. } | CadenceError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            CadenceError::Launch(_)
            | CadenceError::Provider(_)
            | CadenceError::Assessment(_)
            | CadenceError::DataUnavailable(_) => StatusCode::BAD_GATEWAY,
            CadenceError::Scheduling(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            warn!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
