use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Load(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Content configuration error: {0}")]
    Config(String),
    #[error("Failed to read content file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to fetch content from '{url}': {source}")]
    HttpFetch { url: String, source: reqwest::Error },
    #[error("Failed to parse content: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Content error: {0}")]
    Content(#[from] ContentError),
    #[error("Web server/handler error: {0}")]
    Web(#[from] crate::web::WebError),
    #[error("Session system error: {0}")]
    Session(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
