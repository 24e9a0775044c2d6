use log::warn;
use std::env;
use std::str::FromStr;

// Typed settings read once at startup. Every value is optional in the
// environment and falls back to a default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_name: String,
    pub project_version: String,
    pub server_host: String,
    pub server_port: u16,

    // Bedrock
    pub aws_region: String,
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub bedrock_model_id: String,

    // OpenSearch
    pub opensearch_host: String,
    pub opensearch_port: u16,
    pub opensearch_username: String,
    pub opensearch_password: String,
    pub opensearch_use_ssl: bool,
    pub opensearch_verify_certs: bool,
    pub opensearch_index: String,
    pub search_top_k: usize,
    pub search_timeout_secs: u64,

    // Generation
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub generation_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup so tests don't have to
    /// touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Self {
            project_name: text("PROJECT_NAME", "AI Chat API with RAG"),
            project_version: text("PROJECT_VERSION", env!("CARGO_PKG_VERSION")),
            server_host: text("SERVER_HOST", "0.0.0.0"),
            server_port: parsed(&lookup, "SERVER_PORT", 8000),

            aws_region: text("AWS_REGION", "us-east-1"),
            aws_access_key: text("AWS_ACCESS_KEY", ""),
            aws_secret_key: text("AWS_SECRET_KEY", ""),
            bedrock_model_id: text(
                "BEDROCK_MODEL_ID",
                "anthropic.claude-3-sonnet-20240229-v1:0",
            ),

            opensearch_host: text("OPENSEARCH_HOST", "localhost"),
            opensearch_port: parsed(&lookup, "OPENSEARCH_PORT", 9200),
            opensearch_username: text("OPENSEARCH_USERNAME", "admin"),
            opensearch_password: text("OPENSEARCH_PASSWORD", "admin"),
            opensearch_use_ssl: flag(&lookup, "OPENSEARCH_USE_SSL"),
            opensearch_verify_certs: flag(&lookup, "OPENSEARCH_VERIFY_CERTS"),
            opensearch_index: text("OPENSEARCH_INDEX", "documents"),
            search_top_k: parsed(&lookup, "SEARCH_TOP_K", 3),
            search_timeout_secs: parsed(&lookup, "SEARCH_TIMEOUT_SECS", 10),

            max_tokens: parsed(&lookup, "MAX_TOKENS", 2000),
            temperature: parsed(&lookup, "TEMPERATURE", 0.7),
            top_p: parsed(&lookup, "TOP_P", 0.9),
            generation_timeout_secs: parsed(&lookup, "GENERATION_TIMEOUT_SECS", 300),
        }
    }

    pub fn opensearch_url(&self) -> String {
        let scheme = if self.opensearch_use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.opensearch_host, self.opensearch_port)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using default {}", key, raw, default);
            default
        }),
        None => default,
    }
}

// Only a literal "true" (any case) turns a flag on.
fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
