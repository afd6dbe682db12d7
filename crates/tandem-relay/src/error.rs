use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// The topic matches a denied prefix
    #[error("Subscription to {0} is not allowed")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    fn status(&self) -> StatusCode {
        match self {
            RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
            RelayError::Config(_) | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_maps_to_403() {
        let response = RelayError::Forbidden("archive/notes".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn io_maps_to_500() {
        let error = RelayError::from(std::io::Error::other("disk gone"));
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
