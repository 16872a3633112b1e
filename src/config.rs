use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// Raw shape of the JSON config file. Key names follow the environment
/// variables they stand in for.
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "OPENAI_API_KEY")]
    openai_api_key: String,
    #[serde(rename = "TELEGRAM_BOT_TOKEN")]
    telegram_bot_token: String,
}

pub struct Config {
    pub openai_api_key: String,
    pub telegram_bot_token: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.openai_api_key.is_empty() {
            return Err(ConfigError::Validation("OPENAI_API_KEY is required".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("TELEGRAM_BOT_TOKEN is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "TELEGRAM_BOT_TOKEN appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }

        Ok(Self {
            openai_api_key: file.openai_api_key,
            telegram_bot_token: file.telegram_bot_token,
        })
    }
}
