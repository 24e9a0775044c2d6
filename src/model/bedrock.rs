use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::config::{Credentials, Region};
use aws_sdk_bedrockruntime::error::DisplayErrorContext;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::ResponseStream;
use aws_sdk_bedrockruntime::Client;
use futures::TryStreamExt;
use log::{debug, info};
use serde_json::{json, Value};

use super::{CompletionBackend, FragmentStream, GenerationParams};
use crate::config::Settings;
use crate::error::ChatError;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

// Claude on Amazon Bedrock, called through InvokeModelWithResponseStream
pub struct BedrockModel {
    model_id: String,
    client: Client,
}

impl BedrockModel {
    pub async fn new(settings: &Settings) -> Result<Self> {
        info!(
            "Initializing Bedrock client in {} for model {}",
            settings.aws_region, settings.bedrock_model_id
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.aws_region.clone()));

        // Without explicit keys the default AWS credential chain applies.
        if !settings.aws_access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                settings.aws_access_key.clone(),
                settings.aws_secret_key.clone(),
                None,
                None,
                "environment",
            ));
        }

        let sdk_config = loader.load().await;

        Ok(Self {
            model_id: settings.bedrock_model_id.clone(),
            client: Client::new(&sdk_config),
        })
    }
}

#[async_trait]
impl CompletionBackend for BedrockModel {
    async fn stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<FragmentStream, ChatError> {
        let payload = request_payload(prompt, params);
        info!(
            "Invoking {} with max_tokens: {}, temperature: {}",
            self.model_id, params.max_tokens, params.temperature
        );
        debug!("Payload: {}", payload);

        let output = self
            .client
            .invoke_model_with_response_stream()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(serde_json::to_vec(&payload)?))
            .send()
            .await
            .map_err(|e| ChatError::Model(DisplayErrorContext(&e).to_string()))?;

        let events = futures::stream::unfold(Some(output.body), |receiver| async move {
            let Some(mut receiver) = receiver else {
                return None;
            };
            match receiver.recv().await {
                Ok(Some(ResponseStream::Chunk(part))) => {
                    let decoded = match part.bytes() {
                        Some(bytes) => decode_chunk(bytes.as_ref()),
                        None => Ok(None),
                    };
                    let next = if decoded.is_err() { None } else { Some(receiver) };
                    Some((decoded, next))
                }
                Ok(Some(_)) => Some((Ok(None), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((
                    Err(ChatError::Upstream(DisplayErrorContext(&e).to_string())),
                    None,
                )),
            }
        });

        Ok(Box::pin(events.try_filter_map(|fragment| async move { Ok(fragment) })))
    }
}

/// Single-turn Anthropic Messages body carrying the whole rendered prompt.
pub fn request_payload(prompt: &str, params: &GenerationParams) -> Value {
    json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": params.max_tokens,
        "messages": [
            {
                "role": "user",
                "content": prompt
            }
        ],
        "temperature": params.temperature,
        "top_p": params.top_p,
        "stop_sequences": params.stop_sequences,
    })
}

/// Extracts the text carried by one stream chunk.
///
/// Messages API deltas and legacy text-completion chunks both yield text;
/// bookkeeping events (message_start, content_block_stop, ...) yield nothing.
pub fn decode_chunk(bytes: &[u8]) -> Result<Option<String>, ChatError> {
    let event: Value =
        serde_json::from_slice(bytes).map_err(|e| ChatError::MalformedChunk(e.to_string()))?;

    match event.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => Ok(event
            .get("delta")
            .and_then(|delta| delta.get("text"))
            .and_then(|text| text.as_str())
            .map(str::to_string)),
        Some("error") => {
            let message = event
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(|message| message.as_str())
                .unwrap_or("unknown error");
            Err(ChatError::Upstream(message.to_string()))
        }
        _ => Ok(event
            .get("completion")
            .and_then(|completion| completion.as_str())
            .map(str::to_string)),
    }
}
