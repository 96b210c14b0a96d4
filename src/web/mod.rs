use axum::{
    Router,
    routing::{any, get, post},
};
use http::HeaderValue;
use std::{net::SocketAddr, sync::Arc};
use tokio::time::Duration as TokioDuration;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::compression::CompressionLevel;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;
use crate::error::{ConfigError, Result as AppResult};
use crate::state::AppState;

pub mod error;
pub mod handlers;
pub mod ws;

pub use self::error::WebError;

const RATE_LIMIT_REPLENISH_MS: u64 = 500;
const RATE_LIMIT_BURST: u32 = 30;

/// Origins that fail to parse disable CORS entirely rather than silently
/// widening it.
fn cors_layer(server_config: &ServerConfig) -> CorsLayer {
    let parsed: Result<Vec<HeaderValue>, String> = server_config
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .map_err(|e| format!("invalid CORS origin '{origin}': {e}"))
        })
        .collect();

    match parsed {
        Ok(origins) if !origins.is_empty() => {
            tracing::info!(cors.origins.count = origins.len(), "CORS origins allowed");
            CorsLayer::new()
                .allow_methods(vec![http::Method::GET, http::Method::POST])
                .allow_origin(origins)
                .allow_credentials(true)
                .allow_headers(vec![
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ])
        }
        Ok(_) => {
            tracing::info!("No CORS origins configured, restrictive policy applied");
            CorsLayer::new()
        }
        Err(e) => {
            tracing::error!(error = %e, "CORS config rejected, restrictive policy applied");
            CorsLayer::new()
        }
    }
}

#[tracing::instrument(skip(app_state, server_config), fields(
    server.port = server_config.port
))]
pub async fn run_server(app_state: AppState, server_config: ServerConfig) -> AppResult<()> {
    let cors = cors_layer(&server_config);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(RATE_LIMIT_REPLENISH_MS)
            .burst_size(RATE_LIMIT_BURST)
            .finish()
            .ok_or_else(|| ConfigError::InvalidValue("rate limiter settings".to_string()))?,
    );
    tracing::info!(
        rate_limit.per_ms = RATE_LIMIT_REPLENISH_MS,
        rate_limit.burst_size = RATE_LIMIT_BURST,
        "Rate limiter configured"
    );

    // The governor keeps per-peer state; sweep entries for peers that have
    // gone quiet.
    let governor_limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TokioDuration::from_secs(60)).await;
            let limiter_size = governor_limiter.len();
            if limiter_size > 1_000_000 {
                tracing::warn!(
                    rate_limiter.storage_size = limiter_size,
                    "Rate limiter storage is large"
                );
            }
            governor_limiter.retain_recent();
        }
    });

    let app = Router::new()
        .route(
            "/api/create-session",
            post(handlers::create_session_handler),
        )
        .route(
            "/api/refresh-content",
            get(handlers::refresh_content_handler),
        )
        .route("/ws", any(ws::ws_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CompressionLayer::new()
                .quality(CompressionLevel::Default)
                .gzip(true),
        )
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    tracing::info!(server.address = %addr, "HTTP server starting");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(Into::into)
}
