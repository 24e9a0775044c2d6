use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Search request failed: {0}")]
    Search(String),

    #[error("Model invocation failed: {0}")]
    Model(String),

    #[error("Model returned an error: {0}")]
    Upstream(String),

    #[error("Could not decode model stream chunk: {0}")]
    MalformedChunk(String),

    #[error("Generation did not finish within {0} seconds")]
    GenerationTimeout(u64),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self {
            ChatError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "detail": self.to_string() }))
    }
}
