//! Lab Builder - LLM-guided lab authoring service
//!
//! A Rust backend driving a staged conversation (requirements, title,
//! briefing, questions) through a pure state machine.

mod api;
mod config;
mod db;
mod extract;
mod lab;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use runtime::{DatabaseStorage, MemoryStore, RegistryLlmClient, RuntimeManager, SharedStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lab_builder=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Thread checkpoints
    let store: SharedStore = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening database");
            let db = Database::open(path)?;

            // Turns never survive a restart
            let reset = db.reset_all_to_idle()?;
            if reset > 0 {
                tracing::info!(count = reset, "Reset interrupted threads to idle");
            }
            Arc::new(DatabaseStorage::new(db))
        }
        None => {
            tracing::info!("Using in-memory thread store");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        let default_def = llm_registry.default_model_def();
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            default_description = default_def.map(|m| m.description),
            context_window = default_def.map(|m| m.context_window),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API key configured. Set OPENAI_API_KEY.");
    }
    let llm = Arc::new(RegistryLlmClient::new(
        llm_registry.clone(),
        llm_registry.default_model_id().to_string(),
    ));

    let runtime = RuntimeManager::new(store, llm)
        .with_history_policy(config.history_policy)
        .with_max_steps(config.max_steps_per_turn);
    let state = AppState::new(runtime);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        history_policy = ?config.history_policy,
        max_steps = config.max_steps_per_turn,
        "Lab builder listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
