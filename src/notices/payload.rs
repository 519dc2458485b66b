use poise::serenity_prelude::{GuildId, UserId};

use crate::error::{BotError, Result};
use crate::upstream::EventKind;

/// Prefix marking button ids that belong to blacklist notices
pub const CUSTOM_ID_PREFIX: &str = "bw";

/// The four decisions a reviewer can make on a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionAction {
    AcceptBan,
    RejectBlacklist,
    AcceptUnban,
    RejectUnblacklist,
}

impl DecisionAction {
    pub const ALL: [DecisionAction; 4] = [
        DecisionAction::AcceptBan,
        DecisionAction::RejectBlacklist,
        DecisionAction::AcceptUnban,
        DecisionAction::RejectUnblacklist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::AcceptBan => "accept_ban",
            DecisionAction::RejectBlacklist => "reject_blacklist",
            DecisionAction::AcceptUnban => "accept_unban",
            DecisionAction::RejectUnblacklist => "reject_unblacklist",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }

    /// (accept, reject) controls shown on a notice of this kind
    pub fn controls_for(kind: EventKind) -> [DecisionAction; 2] {
        match kind {
            EventKind::Blacklist => [DecisionAction::AcceptBan, DecisionAction::RejectBlacklist],
            EventKind::Unblacklist => [DecisionAction::AcceptUnban, DecisionAction::RejectUnblacklist],
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            DecisionAction::AcceptBan | DecisionAction::RejectBlacklist => EventKind::Blacklist,
            DecisionAction::AcceptUnban | DecisionAction::RejectUnblacklist => EventKind::Unblacklist,
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, DecisionAction::AcceptBan | DecisionAction::AcceptUnban)
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a decision needs, carried in the button's custom id:
/// `bw:<action>:<guild id>:<user id>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticePayload {
    pub action: DecisionAction,
    pub origin_guild: GuildId,
    pub subject: UserId,
}

impl NoticePayload {
    pub fn custom_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            CUSTOM_ID_PREFIX, self.action, self.origin_guild, self.subject
        )
    }

    /// `Ok(None)` for components that are not notice controls at all.
    /// Bare action ids come from notices posted before payloads were embedded
    /// and cannot be acted on.
    pub fn parse(custom_id: &str) -> Result<Option<Self>> {
        if DecisionAction::parse(custom_id).is_some() {
            return Err(BotError::MalformedNotice {
                message: format!("'{}' carries no account payload", custom_id),
            });
        }

        let mut parts = custom_id.split(':');
        if parts.next() != Some(CUSTOM_ID_PREFIX) {
            return Ok(None);
        }

        let malformed = || BotError::MalformedNotice {
            message: format!("cannot parse notice control '{}'", custom_id),
        };

        let action = parts.next().and_then(DecisionAction::parse).ok_or_else(malformed)?;
        let origin_guild = parts
            .next()
            .and_then(parse_snowflake)
            .map(GuildId::new)
            .ok_or_else(malformed)?;
        let subject = parts
            .next()
            .and_then(parse_snowflake)
            .map(UserId::new)
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Some(Self {
            action,
            origin_guild,
            subject,
        }))
    }
}

fn parse_snowflake(raw: &str) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|id| *id != 0)
}
