//! Errors raised while loading configuration or preparing the home directory.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A config value is present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// config.json is not valid JSON or has wrongly typed fields
    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    /// The home directory could not be located
    #[error("Path error: {0}")]
    Path(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
