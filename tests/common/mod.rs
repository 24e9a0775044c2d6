use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer};
use async_trait::async_trait;
use futures::stream;
use rag_chat_relay::config::Settings;
use rag_chat_relay::error::ChatError;
use rag_chat_relay::model::{CompletionBackend, FragmentStream, GenerationParams};
use rag_chat_relay::search::Retriever;
use rag_chat_relay::web::models::Source;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Model that replays a fixed script of fragments and records every prompt.
pub struct ScriptedModel {
    script: Vec<Result<String, String>>,
    reject: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedModel {
    pub fn replying(fragments: &[&str]) -> Self {
        Self::with_script(fragments.iter().map(|f| Ok(f.to_string())).collect())
    }

    pub fn with_script(script: Vec<Result<String, String>>) -> Self {
        Self {
            script,
            reject: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self {
            script: Vec::new(),
            reject: Some(reason.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedModel {
    async fn stream(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<FragmentStream, ChatError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(reason) = &self.reject {
            return Err(ChatError::Model(reason.clone()));
        }
        let items: Vec<Result<String, ChatError>> = self
            .script
            .iter()
            .cloned()
            .map(|item| item.map_err(ChatError::Upstream))
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Model whose invocation never returns, as when the upstream call hangs.
pub struct StalledModel;

#[async_trait]
impl CompletionBackend for StalledModel {
    async fn stream(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<FragmentStream, ChatError> {
        futures::future::pending().await
    }
}

/// Retriever returning canned sources and counting how often it was asked.
pub struct FixedRetriever {
    sources: Vec<Source>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FixedRetriever {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn search(&self, _query: &str, top_k: usize) -> Vec<Source> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.iter().take(top_k).cloned().collect()
    }
}

#[allow(dead_code)]
pub fn source(id: &str, title: &str, score: f64) -> Source {
    Source {
        id: id.to_string(),
        title: title.to_string(),
        content: format!("Body of {}", title),
        url: None,
        score: Some(score),
    }
}

#[allow(dead_code)]
pub fn settings_for_search_port(port: u16) -> Settings {
    Settings::from_lookup(|key| match key {
        "OPENSEARCH_HOST" => Some("127.0.0.1".to_string()),
        "OPENSEARCH_PORT" => Some(port.to_string()),
        "SEARCH_TIMEOUT_SECS" => Some("2".to_string()),
        _ => None,
    })
}

/// Starts an in-process OpenSearch stand-in on an ephemeral port that answers
/// every `_search` with `body`.
#[allow(dead_code)]
pub fn mock_opensearch(body: Value) -> std::io::Result<u16> {
    mock_opensearch_raw(StatusCode::OK, body.to_string())
}

/// Like `mock_opensearch`, but with any status and an arbitrary (possibly
/// non-JSON) body.
#[allow(dead_code)]
pub fn mock_opensearch_raw(status: StatusCode, body: String) -> std::io::Result<u16> {
    let server = HttpServer::new(move || {
        let body = body.clone();
        App::new().route(
            "/{index}/_search",
            web::post().to(move || {
                let body = body.clone();
                async move {
                    HttpResponse::build(status)
                        .content_type("application/json")
                        .body(body)
                }
            }),
        )
    })
    .workers(1)
    .bind(("127.0.0.1", 0))?;

    let port = server.addrs()[0].port();
    actix_web::rt::spawn(server.run());
    Ok(port)
}

/// Splits an ndjson body into parsed objects.
#[allow(dead_code)]
pub fn parse_ndjson(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("each line is a JSON object"))
        .collect()
}
