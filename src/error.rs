use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("Signaling store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<webrtc::Error> for AppError {
    fn from(e: webrtc::Error) -> Self {
        AppError::PeerConnectionError(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "error",
            error: self.to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_message = %body.error,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::RoomNotFound("room".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::StoreUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::CaptureError("no camera".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body() {
        let response = AppError::PeerConnectionError("bad sdp".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Peer connection error: bad sdp");
    }
}
