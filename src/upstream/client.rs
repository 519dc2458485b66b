use async_trait::async_trait;
use backon::Retryable;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::{EventKind, ModerationEvent};
use super::{EventSource, UpstreamError};
use crate::config::{RetryPolicy, UpstreamEndpoints};

/// Profile lookup response; only the name is used
#[derive(Deserialize)]
struct Profile {
    name: Option<String>,
}

/// HTTP client for the moderation feeds and the profile service.
///
/// The underlying `reqwest::Client` is created once by the caller and reused
/// for every request; dropping the `UpstreamClient` closes its connections.
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoints: UpstreamEndpoints,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, endpoints: UpstreamEndpoints, retry: RetryPolicy) -> Self {
        Self {
            http,
            endpoints,
            retry,
        }
    }

    /// Build the shared HTTP session with a per-request timeout
    pub fn build_http(timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("blacklist-watch/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    /// GET a JSON document. `None` means the resource does not exist.
    async fn get_json(&self, url: &str) -> Result<Option<Value>, UpstreamError> {
        with_retry(&self.retry, url, move || async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| UpstreamError::Transport {
                    url: url.to_string(),
                    source: e,
                })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
                debug!("{} returned {}, treating as absent", url, status);
                return Ok(None);
            }
            if !status.is_success() {
                return Err(UpstreamError::Status {
                    url: url.to_string(),
                    status,
                });
            }

            let body = response.bytes().await.map_err(|e| UpstreamError::Transport {
                url: url.to_string(),
                source: e,
            })?;
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(None);
            }

            serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| UpstreamError::Decode {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn fetch_feed(&self, kind: EventKind) -> Result<Vec<ModerationEvent>, UpstreamError> {
        let url = match kind {
            EventKind::Blacklist => &self.endpoints.blacklist_url,
            EventKind::Unblacklist => &self.endpoints.unblacklist_url,
        };

        match self.get_json(url).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(records)) => Ok(decode_records(kind, &records)),
            Some(_) => Err(UpstreamError::Decode {
                url: url.clone(),
                message: "expected a JSON array of events".to_string(),
            }),
        }
    }
}

#[async_trait]
impl EventSource for UpstreamClient {
    async fn fetch_new_blacklists(&self) -> Result<Vec<ModerationEvent>, UpstreamError> {
        self.fetch_feed(EventKind::Blacklist).await
    }

    async fn fetch_new_unblacklists(&self) -> Result<Vec<ModerationEvent>, UpstreamError> {
        self.fetch_feed(EventKind::Unblacklist).await
    }

    async fn resolve_display_name(
        &self,
        subject_external_id: &str,
    ) -> Result<Option<String>, UpstreamError> {
        let url = format!(
            "{}{}",
            self.endpoints.profile_url,
            urlencoding::encode(subject_external_id)
        );

        match self.get_json(&url).await? {
            None => Ok(None),
            Some(value) => {
                let profile: Profile =
                    serde_json::from_value(value).map_err(|e| UpstreamError::Decode {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;
                Ok(profile.name.filter(|n| !n.is_empty()))
            }
        }
    }
}

/// Decode feed records one by one so a single bad record cannot block the
/// rest of the feed
fn decode_records(kind: EventKind, records: &[Value]) -> Vec<ModerationEvent> {
    records
        .iter()
        .filter_map(|record| match ModerationEvent::from_value(kind, record) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping malformed {} record {}: {}", kind, record, e);
                None
            }
        })
        .collect()
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. Only transient errors are retried.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    op.retry(policy.backoff())
        .when(UpstreamError::is_transient)
        .notify(|e: &UpstreamError, delay: Duration| {
            warn!("{} failed: {}. Retrying in {:?}", what, e, delay);
        })
        .await
}
