//! Repair copilot backend
//!
//! Dialog session manager for an LLM-backed equipment-diagnosis assistant:
//! per-user dialog lifecycle, message history, hypothesis-tree state and the
//! finish/archive migration, exposed over a small JSON API.

mod api;
mod archive;
mod assistant;
mod db;
mod exchange;
mod hypothesis;
mod llm;
mod prompts;
mod session;

use api::{create_router, AppState};
use archive::{ArchiveStore, Archiver};
use assistant::Assistant;
use db::Database;
use hypothesis::HypothesisTrees;
use llm::{LlmConfig, LoggingService, OpenAiCompatService};
use session::SessionManager;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repair_copilot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("COPILOT_DB_PATH")
        .unwrap_or_else(|_| "data/conversations.db".to_string());
    let archive_db_path = std::env::var("COPILOT_ARCHIVE_DB_PATH")
        .unwrap_or_else(|_| "data/history.db".to_string());

    let port: u16 = std::env::var("COPILOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Ensure database directories exist
    for path in [&db_path, &archive_db_path] {
        if let Some(parent) = PathBuf::from(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Initialize storage
    tracing::info!(hot = %db_path, archive = %archive_db_path, "Opening databases");
    let hot = Database::open(&db_path)?;
    let archive = ArchiveStore::open(&archive_db_path)?;
    let archiver = Archiver::new(hot.clone(), archive);

    // Initialize the LLM backend
    let llm_config = LlmConfig::from_env()
        .ok_or("LLM_API_KEY not set; the assistant cannot start without a model backend")?;
    tracing::info!(model = %llm_config.model, base_url = %llm_config.base_url, "LLM backend configured");

    let service = Arc::new(LoggingService::new(Arc::new(OpenAiCompatService::new(
        llm_config,
    )?)));
    let model = Arc::new(Assistant::new(service));

    let sessions = SessionManager::new(hot, archiver, HypothesisTrees::in_memory(), model);

    // Sweep dialogs finished before a previous shutdown into the archive
    sessions.recover_unarchived()?;

    // Create application state and router
    let state = AppState::new(sessions);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Repair copilot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
