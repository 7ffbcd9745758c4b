use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

/// Failures reported before any streaming starts.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Anthropic API key not configured")]
    MissingApiKey,
    #[error("No reference articles found")]
    EmptyCorpus,
    /// Server-side fault; the detail is logged, not returned.
    #[error("Failed to start generation")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingApiKey | ApiError::EmptyCorpus | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(detail) => log::error!("Generation request failed: {detail}"),
            _ => log::warn!("Rejecting generation request: {self}"),
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "success": false,
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_internal_error_is_500_without_detail() {
        let error = ApiError::Internal("bad header value".to_string());
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Failed to start generation");
        assert_eq!(body["success"], false);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::InvalidInput("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingApiKey.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::EmptyCorpus.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
