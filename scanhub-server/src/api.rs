//! Response envelope and HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use scanhub_core::HubError;

/// Uniform JSON envelope for client API responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Wrapper turning a [`HubError`] into an HTTP response.
#[derive(Debug)]
pub struct HubHttpError {
    status: StatusCode,
    message: String,
}

impl From<HubError> for HubHttpError {
    fn from(error: HubError) -> Self {
        let status = match &error {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::Ineligible(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for HubHttpError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ApiResponse::<()>::error(self.message));
        (self.status, payload).into_response()
    }
}
