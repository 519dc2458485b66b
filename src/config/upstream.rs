use backon::ExponentialBuilder;
use std::time::Duration;

use super::settings::{optional_parsed, required};
use crate::error::Result;

/// Public profile endpoint used to turn a player UUID into a username
pub const DEFAULT_PROFILE_API_URL: &str =
    "https://sessionserver.mojang.com/session/minecraft/profile/";

/// Locations of the two moderation feeds and the profile lookup
#[derive(Debug, Clone)]
pub struct UpstreamEndpoints {
    pub blacklist_url: String,
    pub unblacklist_url: String,
    /// Prefix; the subject id is appended verbatim
    pub profile_url: String,
}

impl UpstreamEndpoints {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            blacklist_url: required("BLACKLIST_API_URL")?,
            unblacklist_url: required("UNBLACKLIST_API_URL")?,
            profile_url: std::env::var("PROFILE_API_URL")
                .unwrap_or_else(|_| DEFAULT_PROFILE_API_URL.to_string()),
        })
    }
}

/// Bounded retry with exponential backoff for upstream calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let max_attempts: u32 =
            optional_parsed("UPSTREAM_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts);
        let base_delay = optional_parsed::<u64>("UPSTREAM_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_delay);

        Ok(Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        })
    }

    /// Exponential schedule for the retries after the first attempt:
    /// `base_delay`, then doubling each time.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_backoff_doubles_between_attempts() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };

        let delays: Vec<Duration> = policy.backoff().build().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ]
        );
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let policy = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.backoff().build().count(), 0);
    }
}
