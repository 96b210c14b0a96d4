use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Deserialize;

use super::error::{Result as WebResult, WebError};
use crate::session::SessionDetails;
use crate::state::AppState;

#[derive(Deserialize, Debug, Default)]
pub struct CreateSessionRequest {
    pub session_name: String,
    pub game_type: Option<String>,
}

pub async fn create_session_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> WebResult<Json<SessionDetails>> {
    tracing::info!(request = ?payload, "Create session requested");

    if payload.session_name.trim().is_empty() {
        return Err(WebError::BadRequest(
            "Session name cannot be empty.".to_string(),
        ));
    }

    let details = app_state
        .session_manager
        .create_session(payload.session_name, payload.game_type)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Session creation rejected");
            WebError::BadRequest(e)
        })?;

    Ok(Json(details))
}

pub async fn refresh_content_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> WebResult<StatusCode> {
    tracing::info!("Content refresh requested");

    // Only guarded when an admin key is configured.
    if let Some(expected_key) = app_state.server_config.admin_api_key.as_ref() {
        match headers.get(http::header::AUTHORIZATION) {
            Some(auth_header_val) => {
                let auth_header_str = auth_header_val.to_str().unwrap_or("");
                match auth_header_str.strip_prefix("ApiKey ") {
                    Some(provided_key) if provided_key.trim() == expected_key.as_str() => {
                        tracing::info!("Admin API key validated successfully for refresh_content");
                    }
                    Some(_) => {
                        tracing::warn!(
                            "Unauthorized attempt to refresh content: invalid API key provided"
                        );
                        return Err(WebError::Unauthorized("Invalid API key".to_string()));
                    }
                    None => {
                        tracing::warn!(
                            "Unauthorized attempt to refresh content: Authorization header format incorrect"
                        );
                        return Err(WebError::Unauthorized(
                            "Invalid Authorization header format. Expected 'ApiKey <key>'"
                                .to_string(),
                        ));
                    }
                }
            }
            None => {
                tracing::warn!(
                    "Unauthorized attempt to refresh content: missing Authorization header"
                );
                return Err(WebError::Unauthorized(
                    "Missing Authorization header".to_string(),
                ));
            }
        }
    }

    app_state
        .prompt_cache
        .refresh_all_content()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Content refresh failed");
            WebError::InternalServerError(format!("Failed to refresh content: {}", e))
        })?;

    Ok(StatusCode::OK)
}
