pub mod bedrock;
pub mod stream;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::config::Settings;
use crate::error::ChatError;
use crate::prompt::STOP_SEQUENCE;
use crate::web::models::ChatRequest;

pub use bedrock::BedrockModel;
pub use stream::ChatStream;

/// Text fragments as the model produces them.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
}

impl GenerationParams {
    /// Request values win over configured defaults. Top-p is server-side only.
    pub fn resolve(request: &ChatRequest, settings: &Settings) -> Self {
        Self {
            max_tokens: request.max_tokens.unwrap_or(settings.max_tokens),
            temperature: request.temperature.unwrap_or(settings.temperature),
            top_p: settings.top_p,
            stop_sequences: vec![STOP_SEQUENCE.to_string()],
        }
    }
}

/// A remote model that can stream a completion for a single prompt.
///
/// Errors returned from `stream` happen before any output exists; errors
/// yielded by the returned stream abort generation part way through.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<FragmentStream, ChatError>;
}
