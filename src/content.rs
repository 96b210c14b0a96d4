use crate::config::{ContentConfig, ContentSourceType};
use crate::error::{ContentError, Result as AppResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One emoji clue together with the answer the host judges against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiPrompt {
    pub emoji: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmojiPictionaryContent {
    pub prompts: Vec<EmojiPrompt>,
}

// Root data structure matching the JSON schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonContentSnapshot {
    pub emoji_pictionary: EmojiPictionaryContent,
}

#[derive(Debug, Clone)]
pub struct ContentSnapshot {
    pub emoji_prompts: Vec<EmojiPrompt>,
}

pub struct ContentParser;

impl ContentParser {
    /// Parse JSON structured data
    #[tracing::instrument(skip(content), fields(content.length = content.len()))]
    pub fn parse_structured_data(content: &str) -> Result<ContentSnapshot, ContentError> {
        tracing::debug!("Parsing JSON structured data");

        let json_data: JsonContentSnapshot = serde_json::from_str(content)
            .map_err(|e| ContentError::Parse(format!("Failed to parse JSON: {}", e)))?;

        Ok(ContentSnapshot {
            emoji_prompts: json_data
                .emoji_pictionary
                .prompts
                .into_iter()
                .map(|p| EmojiPrompt {
                    emoji: p.emoji.trim().to_string(),
                    answer: p.answer.trim().to_string(),
                    category: p.category,
                })
                .filter(|p| !p.emoji.is_empty() && !p.answer.is_empty())
                .collect(),
        })
    }
}

#[tracing::instrument(skip(config), fields(
    content.source_type = ?config.source_type,
    content.file_path = ?config.file_path,
    content.http_url = ?config.http_url
))]
async fn load_content_snapshot_from_config(
    config: &ContentConfig,
) -> Result<ContentSnapshot, ContentError> {
    let raw_content = load_raw_content(config).await?;
    let snapshot = ContentParser::parse_structured_data(&raw_content)?;

    tracing::info!(
        prompts.count = snapshot.emoji_prompts.len(),
        "Loaded structured data"
    );

    Ok(snapshot)
}

#[tracing::instrument(skip(config))]
async fn load_raw_content(config: &ContentConfig) -> Result<String, ContentError> {
    match config.source_type {
        ContentSourceType::File => {
            let file_path = config.file_path.as_ref().ok_or_else(|| {
                ContentError::Config("File path required for file source".to_string())
            })?;
            tracing::debug!(file.path = %file_path, "Loading prompt deck from file");
            tokio::fs::read_to_string(file_path)
                .await
                .map_err(|e| ContentError::FileRead {
                    path: file_path.clone(),
                    source: e,
                })
        }
        ContentSourceType::Http => {
            let url = config.http_url.as_ref().ok_or_else(|| {
                ContentError::Config("HTTP URL required for http source".to_string())
            })?;
            tracing::debug!(http.url = %url, "Fetching prompt deck from URL");
            let response = reqwest::get(url)
                .await
                .map_err(|e| ContentError::HttpFetch {
                    url: url.clone(),
                    source: e,
                })?;

            response.text().await.map_err(|e| ContentError::HttpFetch {
                url: url.clone(),
                source: e,
            })
        }
        ContentSourceType::None => {
            tracing::info!("No content source configured. Engines fall back to builtin decks");
            Ok(r#"{"emoji_pictionary":{"prompts":[]}}"#.to_string())
        }
    }
}

/// Cached prompt decks, refreshable at runtime without restarting sessions.
/// Sessions created after a refresh see the new deck; running sessions keep
/// the deck they were created with.
pub struct PromptCache {
    emoji_prompts: RwLock<Arc<Vec<EmojiPrompt>>>,
    content_config: ContentConfig,
}

impl PromptCache {
    #[tracing::instrument(skip(config), fields(
        content.source_type = ?config.source_type,
        content.file_path = ?config.file_path,
        content.http_url = ?config.http_url
    ))]
    pub async fn new(config: ContentConfig) -> AppResult<Self> {
        let initial_data = load_content_snapshot_from_config(&config)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "Failed to load required prompt deck");
                err
            })?;

        tracing::info!(
            prompts.count = initial_data.emoji_prompts.len(),
            "PromptCache initialized successfully"
        );

        Ok(Self {
            emoji_prompts: RwLock::new(Arc::new(initial_data.emoji_prompts)),
            content_config: config,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn refresh_all_content(&self) -> AppResult<()> {
        tracing::info!("Refreshing cached prompt decks");
        let new_data = load_content_snapshot_from_config(&self.content_config).await?;

        {
            let mut prompts_guard = self.emoji_prompts.write().await;
            *prompts_guard = Arc::new(new_data.emoji_prompts);
            tracing::info!(
                prompts.count = prompts_guard.len(),
                "Refreshed emoji prompt deck"
            );
        }

        Ok(())
    }

    pub async fn emoji_prompts(&self) -> Arc<Vec<EmojiPrompt>> {
        self.emoji_prompts.read().await.clone()
    }
}
