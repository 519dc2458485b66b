//! Access to the upstream moderation feeds and the profile lookup service.

pub mod client;
pub mod models;

pub use client::UpstreamClient;
pub use models::{EventKind, ModerationEvent};

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to an upstream service after retries were exhausted
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl UpstreamError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Transport { .. } => true,
            UpstreamError::Status { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            UpstreamError::Decode { .. } => false,
        }
    }
}

/// Source of moderation events and display names.
///
/// "Nothing new" and "not found" are successful results; an `Err` means the
/// service could not be reached even after retrying.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_new_blacklists(&self) -> Result<Vec<ModerationEvent>, UpstreamError>;

    async fn fetch_new_unblacklists(&self) -> Result<Vec<ModerationEvent>, UpstreamError>;

    async fn resolve_display_name(
        &self,
        subject_external_id: &str,
    ) -> Result<Option<String>, UpstreamError>;
}
