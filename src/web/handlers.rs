use actix_web::{web, HttpResponse, Responder, ResponseError};
use bytes::Bytes;
use futures::StreamExt;
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::error::ChatError;
use crate::model::{ChatStream, GenerationParams};
use crate::prompt::format_prompt;
use crate::web::models::ChatRequest;
use crate::AppState;

pub const NDJSON: &str = "application/x-ndjson";

// Welcome payload
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "message": format!("Welcome to {}", data.settings.project_name),
        "version": data.settings.project_version,
    }))
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Chat API endpoint: retrieve, format, then stream the model output as ndjson
pub async fn chat(
    data: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse, ChatError> {
    let request = req.into_inner();
    let request_id = Uuid::new_v4();

    validate(&request)?;
    info!(
        "Chat request {}: {} messages (stream: {})",
        request_id,
        request.messages.len(),
        request.stream
    );

    let sources = match request.query() {
        Some(query) => data.retriever.search(query, data.settings.search_top_k).await,
        None => Vec::new(),
    };

    let prompt = format_prompt(&request.messages, &sources);
    let params = GenerationParams::resolve(&request, &data.settings);

    // One deadline covers both the invocation and the streamed output.
    let timeout = Duration::from_secs(data.settings.generation_timeout_secs);
    let deadline = Instant::now() + timeout;

    let fragments = timeout_at(deadline, data.model.stream(&prompt, &params))
        .await
        .unwrap_or_else(|_| Err(ChatError::GenerationTimeout(timeout.as_secs())))
        .map_err(|e| {
            error!("{}", failure_log_line(request_id, &e));
            e
        })?;

    let chat = ChatStream::with_deadline(fragments, sources, deadline, timeout);

    if !request.stream {
        let response = chat.collect_response().await.map_err(|e| {
            error!("{}", failure_log_line(request_id, &e));
            e
        })?;
        return Ok(HttpResponse::Ok()
            .content_type(NDJSON)
            .body(ndjson_line(&response)?));
    }

    // Status and headers are already sent once the body starts, so a failure
    // here can only cut the stream short.
    let body = chat.into_stream().map(move |chunk| {
        chunk.and_then(|chunk| ndjson_line(&chunk)).map_err(|e| {
            error!("{} (mid-stream)", failure_log_line(request_id, &e));
            e
        })
    });

    Ok(HttpResponse::Ok().content_type(NDJSON).streaming(body))
}

fn validate(request: &ChatRequest) -> Result<(), ChatError> {
    if request.messages.is_empty() {
        return Err(ChatError::InvalidRequest(
            "messages must contain at least one message".to_string(),
        ));
    }
    if request.max_tokens == Some(0) {
        return Err(ChatError::InvalidRequest(
            "max_tokens must be greater than zero".to_string(),
        ));
    }
    if let Some(temperature) = request.temperature {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ChatError::InvalidRequest(format!(
                "temperature must be between 0 and 1, got {}",
                temperature
            )));
        }
    }
    Ok(())
}

/// Failure record keyed the same way for every stage, including failures after
/// the 200 status line has already gone out.
pub fn failure_log_line(request_id: Uuid, err: &ChatError) -> String {
    format!(
        "status={} request_id={} error=\"{}\"",
        err.status_code().as_u16(),
        request_id,
        err
    )
}

/// One JSON object terminated by a newline.
pub fn ndjson_line<T: Serialize>(value: &T) -> Result<Bytes, ChatError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}
