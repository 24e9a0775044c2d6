use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Settings;
use crate::error::ChatError;
use crate::web::models::Source;

/// Looks up grounding documents for a query.
///
/// Retrieval is best effort: implementations return an empty list instead of
/// failing, so a broken search backend never fails a chat request.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Vec<Source>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: HitSource,
}

#[derive(Debug, Default, Deserialize)]
struct HitSource {
    title: Option<String>,
    content: Option<String>,
    url: Option<String>,
}

impl From<Hit> for Source {
    fn from(hit: Hit) -> Self {
        Source {
            id: hit.id,
            title: hit.source.title.unwrap_or_else(|| "No Title".to_string()),
            content: hit.source.content.unwrap_or_default(),
            url: hit.source.url,
            score: hit.score,
        }
    }
}

// Retriever backed by the OpenSearch REST API
pub struct OpenSearchRetriever {
    search_url: String,
    credentials: Option<(String, String)>,
    client: Client,
}

impl OpenSearchRetriever {
    pub fn new(settings: &Settings) -> Result<Self> {
        let base_url = settings.opensearch_url();
        info!(
            "Using OpenSearch index '{}' at: {}",
            settings.opensearch_index, base_url
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.search_timeout_secs))
            .danger_accept_invalid_certs(!settings.opensearch_verify_certs)
            .build()?;

        let credentials = if settings.opensearch_username.is_empty() {
            None
        } else {
            Some((
                settings.opensearch_username.clone(),
                settings.opensearch_password.clone(),
            ))
        };

        Ok(Self {
            search_url: format!("{}/{}/_search", base_url, settings.opensearch_index),
            credentials,
            client,
        })
    }

    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<Source>, ChatError> {
        let body = search_body(query, top_k);
        debug!("Search body: {}", body);

        let mut request = self.client.post(&self.search_url).json(&body);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Search(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Search(format!("HTTP {}: {}", status, error_text)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Search(format!("malformed response: {}", e)))?;

        Ok(parsed.hits.hits.into_iter().map(Source::from).collect())
    }
}

#[async_trait]
impl Retriever for OpenSearchRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Vec<Source> {
        match self.query(query, top_k).await {
            Ok(sources) => {
                info!("Retrieved {} documents", sources.len());
                sources
            }
            Err(e) => {
                warn!("{}; continuing without documents", e);
                Vec::new()
            }
        }
    }
}

/// Title matches count twice as much as body matches.
pub fn search_body(query: &str, top_k: usize) -> Value {
    json!({
        "query": {
            "multi_match": {
                "query": query,
                "fields": ["content", "title^2"],
                "type": "best_fields"
            }
        },
        "size": top_k
    })
}
