use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

use rag_chat_relay::config::Settings;
use rag_chat_relay::model::BedrockModel;
use rag_chat_relay::search::OpenSearchRetriever;
use rag_chat_relay::web::routes;
use rag_chat_relay::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::from_env();
    info!("Starting {} v{}", settings.project_name, settings.project_version);

    let retriever = match OpenSearchRetriever::new(&settings) {
        Ok(retriever) => retriever,
        Err(e) => {
            error!("Failed to initialize OpenSearch client: {}", e);
            std::process::exit(1);
        }
    };

    let model = match BedrockModel::new(&settings).await {
        Ok(model) => {
            info!("Bedrock client initialized");
            model
        }
        Err(e) => {
            error!("Failed to initialize Bedrock client: {}", e);
            std::process::exit(1);
        }
    };

    let bind = (settings.server_host.clone(), settings.server_port);
    let app_state = Data::new(AppState {
        settings,
        retriever: Arc::new(retriever),
        model: Arc::new(model),
    });

    info!("Listening on {}:{}", bind.0, bind.1);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run()
    .await
}
