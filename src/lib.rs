pub mod config;
pub mod error;
pub mod model;
pub mod prompt;
pub mod search;
pub mod web;

use std::sync::Arc;

use config::Settings;
use model::CompletionBackend;
use search::Retriever;

// Shared, read-only state handed to every request. Both clients are built
// once at startup and are safe to use from concurrent requests.
pub struct AppState {
    pub settings: Settings,
    pub retriever: Arc<dyn Retriever>,
    pub model: Arc<dyn CompletionBackend>,
}
