mod catalog;
mod config;
mod entity;
mod ollama;
mod orchestrator;
mod policy;
mod prompt;
mod server;
mod store;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    let store = store::ConversationStore::open(&config.data_dir).await?;
    let client: Arc<dyn ollama::InferenceClient> =
        Arc::new(ollama::OllamaClient::new(&config.ollama_url));
    let catalog = catalog::ModelCatalog::new(client.clone());
    let policy = Arc::new(policy::AccessPolicy::new(&config.fallback_model));
    let orchestrator =
        orchestrator::ChatOrchestrator::new(client, catalog.clone(), store.clone());

    let app = server::router(server::AppState {
        store,
        catalog,
        policy,
        orchestrator,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
