//! Main Entrypoint for the Tonality API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Setting up the session history stores (Postgres when configured, local files always).
//! 3. Initializing the chat backend and loading the system prompt.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{fs, net::SocketAddr, sync::Arc};
use tonality_api::{config::Config, db::Db, router::create_router, state::AppState};
use tonality_core::{
    chat::{ChatBackend, OpenAICompatibleChat},
    persistence::{FileKeyValueStore, PersistenceGateway, PrimaryStore},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = ?e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// Connects the primary store, if one is configured.
///
/// A database that cannot be migrated at startup is still used: every
/// operation against it fails over to the local store on its own.
async fn primary_store(config: &Config) -> anyhow::Result<Option<Arc<dyn PrimaryStore>>> {
    let Some(database_url) = &config.database_url else {
        return Ok(None);
    };
    let db = Db::connect_lazy(database_url)?;
    match db.run_migrations().await {
        Ok(()) => info!("Database migrations are up-to-date."),
        Err(e) => error!(error = ?e, "Failed to run database migrations"),
    }
    Ok(Some(Arc::new(db)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Session History ---
    let gateway = Arc::new(PersistenceGateway::new(
        primary_store(&config).await?,
        Arc::new(FileKeyValueStore::new(config.local_store_path.clone())),
    ));

    // --- 4. Initialize Chat Backend ---
    let prompt_path = config.prompts_path.join("system_prompt.md");
    let system_prompt = Arc::new(
        fs::read_to_string(&prompt_path)
            .with_context(|| format!("Failed to read {}", prompt_path.display()))?,
    );
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.api_key)
        .with_api_base(config.provider.api_base());
    let chat_backend: Arc<dyn ChatBackend> = Arc::new(OpenAICompatibleChat::new(
        openai_config,
        config.chat_model.clone(),
    ));

    let app_state = Arc::new(AppState::new(
        gateway.clone(),
        chat_backend,
        system_prompt,
        Arc::new(config.clone()),
    ));

    let eviction = app_state.clone().spawn_eviction();

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        primary_store = gateway.has_primary(),
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    eviction.abort();
    info!("Server has shut down.");
    Ok(())
}
