//! Mapping of library errors onto HTTP responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Error returned by every handler.
///
/// Rendered as `{ "success": false, "error": "<message>" }`.
#[derive(Debug)]
pub struct ApiError(pub ipasign::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ipasign::Error::Validation(_) | ipasign::Error::InvalidState(_) => {
                StatusCode::BAD_REQUEST
            }
            ipasign::Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ipasign::Error> for ApiError {
    fn from(err: ipasign::Error) -> Self {
        ApiError(err)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError(ipasign::Error::Io(err))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError(ipasign::Error::Validation(format!(
            "Invalid multipart body: {}",
            err.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        let body = Json(json!({
            "success": false,
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ipasign::Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ipasign::Error::InvalidState("x".into()), StatusCode::BAD_REQUEST),
            (ipasign::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ipasign::Error::InvalidPassword, StatusCode::INTERNAL_SERVER_ERROR),
            (ipasign::Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
