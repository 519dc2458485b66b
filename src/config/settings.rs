use poise::serenity_prelude::RoleId;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::upstream::{RetryPolicy, UpstreamEndpoints};
use crate::error::{BotError, Result};

/// Name of the guild state file inside `STATE_PATH`
pub const STATE_FILE_NAME: &str = "guild_config.json";

/// Poll loop timing and persistence batching
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    /// Seen-set updates queued before the store is flushed mid-cycle
    pub flush_threshold: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            flush_threshold: 5,
        }
    }
}

/// Everything the bot reads from the environment at startup
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub token: String,
    /// Reviewer role used when a guild has not configured its own
    pub default_reviewer_role: Option<RoleId>,
    pub state_file: PathBuf,
    pub request_timeout: Duration,
    pub poll: PollSettings,
    pub endpoints: UpstreamEndpoints,
    pub retry: RetryPolicy,
}

impl BotSettings {
    pub fn from_env() -> Result<Self> {
        let token = required("DISCORD_TOKEN")?;

        let default_reviewer_role = optional_parsed::<u64>("DEFAULT_STAFF")?
            .filter(|id| *id != 0)
            .map(RoleId::new);

        let state_dir = std::env::var("STATE_PATH").unwrap_or_else(|_| "data".to_string());
        let state_file = PathBuf::from(state_dir).join(STATE_FILE_NAME);

        let defaults = PollSettings::default();
        let poll = PollSettings {
            interval: optional_parsed::<u64>("POLL_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            flush_threshold: optional_parsed("STATE_FLUSH_THRESHOLD")?
                .unwrap_or(defaults.flush_threshold),
        };

        let request_timeout = Duration::from_secs(
            optional_parsed("REQUEST_TIMEOUT_SECS")?.unwrap_or(10),
        );

        let settings = Self {
            token,
            default_reviewer_role,
            state_file,
            request_timeout,
            poll,
            endpoints: UpstreamEndpoints::from_env()?,
            retry: RetryPolicy::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll.interval.is_zero() {
            return Err(BotError::ConfigValidation {
                message: "poll interval must be at least one second".to_string(),
            });
        }
        if self.poll.flush_threshold == 0 {
            return Err(BotError::ConfigValidation {
                message: "STATE_FLUSH_THRESHOLD must be greater than zero".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(BotError::ConfigValidation {
                message: "REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(BotError::MissingEnv {
            name: name.to_string(),
        }),
    }
}

pub(crate) fn optional_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| BotError::ConfigValidation {
            message: format!("{} has invalid value '{}': {}", name, raw, e),
        })
}
