use std::sync::Arc;

use crate::config::ServerConfig;
use crate::content::PromptCache;
use crate::session::SessionManagerHandle;

#[derive(Clone)]
pub struct AppState {
    pub session_manager: SessionManagerHandle,
    pub prompt_cache: Arc<PromptCache>,
    pub server_config: Arc<ServerConfig>,
}
