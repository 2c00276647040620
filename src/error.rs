use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("No JSON data provided")]
    MissingBody,
    #[error("No prompt provided")]
    MissingPrompt,
    #[error("Model not loaded")]
    ModelUnavailable,
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn generation(err: impl std::fmt::Display) -> Self {
        ServiceError::GenerationFailed(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingBody | ServiceError::MissingPrompt => StatusCode::BAD_REQUEST,
            ServiceError::ModelUnavailable
            | ServiceError::GenerationFailed(_)
            | ServiceError::ModelLoad(_)
            | ServiceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
