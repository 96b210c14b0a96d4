use crate::error::{ConfigError, Result as AppResult};
use crate::game_logic::GameType;
use config::{Config, Environment, File, Value, ValueKind};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// When set, `/api/refresh-content` requires `Authorization: ApiKey <key>`.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GamesConfig {
    #[serde(deserialize_with = "deserialize_string_or_list_to_set_lowercase")]
    pub enabled_types: HashSet<String>,
}

impl Default for GamesConfig {
    fn default() -> Self {
        let enabled_types = GameType::all()
            .iter()
            .map(|game_type| game_type.primary_id().to_string())
            .collect();
        Self { enabled_types }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ContentSourceType {
    File,
    Http,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    pub source_type: ContentSourceType,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub http_url: Option<String>,
}

/// Per-session rule defaults. Point values are configuration rather than
/// constants; sessions may further adjust rounds/seconds during setup.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub correct_points: i32,
    pub incorrect_penalty: i32,
    pub round_seconds: u32,
    pub total_rounds: u32,
    pub min_teams: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub games: GamesConfig,
    pub content: ContentConfig,
    pub scoring: ScoringConfig,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let mut builder = Config::builder()
        .add_source(
            Environment::with_prefix("EMOJINARY")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        )
        .add_source(File::with_name("config").required(false));

    let default_games: Vec<Value> = GameType::all()
        .iter()
        .map(|game_type| Value::new(None, ValueKind::String(game_type.primary_id().to_string())))
        .collect();

    builder = builder
        .set_default(
            "games.enabled_types",
            Value::new(None, ValueKind::Array(default_games)),
        )
        .and_then(|b| b.set_default("server.port", 3000_i64))
        .and_then(|b| b.set_default("server.cors_origins", Vec::<String>::new()))
        .and_then(|b| b.set_default("content.source_type", "none"))
        .and_then(|b| b.set_default("scoring.correct_points", 1_i64))
        .and_then(|b| b.set_default("scoring.incorrect_penalty", 1_i64))
        .and_then(|b| b.set_default("scoring.round_seconds", 60_i64))
        .and_then(|b| b.set_default("scoring.total_rounds", 10_i64))
        .and_then(|b| b.set_default("scoring.min_teams", 2_i64))
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &AppSettings) -> Result<(), ConfigError> {
    if settings.scoring.total_rounds == 0 {
        return Err(ConfigError::InvalidValue(
            "scoring.total_rounds must be at least 1".to_string(),
        ));
    }
    if settings.scoring.round_seconds == 0 {
        return Err(ConfigError::InvalidValue(
            "scoring.round_seconds must be at least 1".to_string(),
        ));
    }
    if settings.scoring.min_teams < 2 {
        return Err(ConfigError::InvalidValue(
            "scoring.min_teams must be at least 2".to_string(),
        ));
    }
    Ok(())
}

fn deserialize_string_or_list_to_set_lowercase<'de, D>(
    deserializer: D,
) -> Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    let mut set = HashSet::new();

    match value {
        Value::String(s) => {
            let trimmed = s.trim().to_lowercase();
            if trimmed == "all" {
                // Enable all available games
                for game_type in GameType::all() {
                    set.insert(game_type.primary_id().to_string());
                }
            } else {
                for item in s.split(',') {
                    set.insert(item.trim().to_lowercase());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                if let Value::String(s) = item {
                    set.insert(s.to_lowercase());
                } else {
                    return Err(D::Error::custom("Array must contain only strings"));
                }
            }
        }
        _ => return Err(D::Error::custom("Expected string or array of strings")),
    }

    Ok(set)
}
