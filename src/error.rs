use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("Missing required environment variable: {name}")]
    MissingEnv { name: String },

    #[error("Invalid config: {message}")]
    ConfigValidation { message: String },

    // State errors
    #[error("Failed to parse state file '{path}': {source}")]
    StateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to save state to '{path}': {source}")]
    StateSave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load state from '{path}': {source}")]
    StateLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // Upstream errors
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] UpstreamError),

    // Discord errors
    #[error("Discord API error: {message}")]
    Discord { message: String },

    #[error("Guild not found: {id}")]
    GuildNotFound { id: String },

    #[error("Malformed notice: {message}")]
    MalformedNotice { message: String },

    // Permission errors
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Discord {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
