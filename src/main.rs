use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Module Declarations ---
mod config;
mod content;
mod error;
mod game_logic;
mod session;
mod state;
mod web;

// --- Imports ---
use crate::config::load_settings;
use crate::content::PromptCache;
use crate::error::Result as AppResult;
use crate::session::SessionManagerHandle;
use crate::state::AppState;
use crate::web::run_server;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Setup tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load Configuration
    let app_settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", app_settings);

    // Initialize the prompt cache
    let prompt_cache = Arc::new(PromptCache::new(app_settings.content.clone()).await?);
    let initial_prompts = prompt_cache.emoji_prompts().await;
    tracing::info!(
        prompts.count = initial_prompts.len(),
        "PromptCache initialized"
    );

    // Initialize the session manager
    let session_manager_handle = SessionManagerHandle::spawn(
        32,
        app_settings.games.clone(),
        app_settings.scoring.clone(),
        Arc::clone(&prompt_cache),
    );

    // Create AppState
    let app_state = AppState {
        session_manager: session_manager_handle,
        prompt_cache,
        server_config: Arc::new(app_settings.server.clone()),
    };

    // Run the web server
    run_server(app_state, app_settings.server).await?;

    Ok(())
}
