//! Reviewer decisions on posted notices.
//!
//! The flow is the same for every action: authorize the actor, apply the
//! enforcement for accepts, then rewrite the notice without its controls and
//! announce the result. The rewrite is what stops a notice from being decided
//! twice; a denied actor or a failed enforcement leaves the controls in place.

pub mod discord;

pub use discord::DiscordSurface;

use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use tracing::{info, warn};

use crate::error::{BotError, Result};
use crate::notices::render::{COLOR_BANNED, COLOR_REJECTED, COLOR_UNBANNED};
use crate::notices::{DecisionAction, NoticePayload};
use crate::upstream::EventKind;

pub const DENIED_MESSAGE: &str = "❌ Only server owners and moderators can manage blacklists.";
pub const GENERIC_FAILURE_MESSAGE: &str = "❌ This notice could not be processed.";

/// The member who pressed a control
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub roles: Vec<RoleId>,
}

/// Everything needed to decide one button press
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub payload: NoticePayload,
    /// Guild the interaction happened in
    pub guild_id: GuildId,
    pub owner_id: UserId,
    pub actor: Actor,
    pub configured_role: Option<RoleId>,
    pub default_role: Option<RoleId>,
}

/// How a decided notice is rewritten
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub title: &'static str,
    pub color: u32,
    /// (name, value) pairs appended to the original embed
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Denied,
    ActionFailed,
    Completed(DecisionAction),
}

/// What the decision flow needs from the chat platform
#[async_trait]
pub trait DecisionSurface: Send + Sync {
    /// Private reply to an actor who may not decide
    async fn deny(&self, message: &str) -> Result<()>;

    /// Private reply when the decision could not be carried out
    async fn report_failure(&self, message: &str) -> Result<()>;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()>;

    async fn unban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()>;

    /// Rewrite the notice with the outcome and remove its controls
    async fn finalize(&self, resolution: &Resolution) -> Result<()>;

    /// Public message in the notice's channel
    async fn announce(&self, message: &str) -> Result<()>;
}

/// Guild owner always; otherwise the guild's reviewer role, or the default
/// role when the guild has none configured.
pub fn is_authorized(
    actor_id: UserId,
    actor_roles: &[RoleId],
    owner_id: UserId,
    configured_role: Option<RoleId>,
    default_role: Option<RoleId>,
) -> bool {
    if actor_id == owner_id {
        return true;
    }
    match configured_role.or(default_role) {
        Some(role) => actor_roles.contains(&role),
        None => false,
    }
}

/// Outcome fields for a completed decision
pub fn resolution_for(action: DecisionAction, actor_name: &str, decided_at: i64) -> Resolution {
    let mut fields = Vec::new();
    let (title, color) = match action {
        DecisionAction::AcceptBan => {
            fields.push(("Decision".to_string(), format!("Banned by {}", actor_name)));
            fields.push(("Reason".to_string(), enforcement_reason(action, actor_name)));
            ("🚫 User Banned", COLOR_BANNED)
        }
        DecisionAction::AcceptUnban => {
            fields.push(("Decision".to_string(), format!("Unbanned by {}", actor_name)));
            fields.push(("Reason".to_string(), enforcement_reason(action, actor_name)));
            ("✅ User Unbanned", COLOR_UNBANNED)
        }
        DecisionAction::RejectBlacklist => {
            fields.push(("Decision".to_string(), format!("Rejected by {}", actor_name)));
            ("🚫 Blacklist Rejected", COLOR_REJECTED)
        }
        DecisionAction::RejectUnblacklist => {
            fields.push(("Decision".to_string(), format!("Rejected by {}", actor_name)));
            ("✅ Unblacklist Rejected", COLOR_REJECTED)
        }
    };
    fields.push(("Decided".to_string(), format!("<t:{}:F>", decided_at)));

    Resolution {
        title,
        color,
        fields,
    }
}

/// Audit log reason for accepts
pub fn enforcement_reason(action: DecisionAction, actor_name: &str) -> String {
    match action.kind() {
        EventKind::Blacklist => format!("Blacklist accepted by {}", actor_name),
        EventKind::Unblacklist => format!("Unblacklist accepted by {}", actor_name),
    }
}

pub fn announcement(action: DecisionAction, actor_name: &str) -> String {
    let what = match action {
        DecisionAction::AcceptBan => "banned the user",
        DecisionAction::RejectBlacklist => "rejected the blacklist",
        DecisionAction::AcceptUnban => "unbanned the user",
        DecisionAction::RejectUnblacklist => "rejected the unblacklist",
    };
    format!("{} has {}.", actor_name, what)
}

fn failure_message(action: DecisionAction, err: &BotError) -> String {
    let verb = match action {
        DecisionAction::AcceptUnban => "unban",
        _ => "ban",
    };
    match err {
        BotError::PermissionDenied { .. } => format!("❌ I don't have permission to {} members.", verb),
        other => format!("❌ Failed to {} user: {}", verb, other),
    }
}

/// Carry out one decision against `surface`.
///
/// Returns an error only for notices that cannot be acted on at all
/// (payload from another guild) or when the surface itself fails; the caller
/// reports those generically.
pub async fn handle_decision(
    surface: &dyn DecisionSurface,
    request: &DecisionRequest,
    decided_at: i64,
) -> Result<DecisionOutcome> {
    let payload = request.payload;
    if payload.origin_guild != request.guild_id {
        return Err(BotError::MalformedNotice {
            message: format!(
                "notice for guild {} used in guild {}",
                payload.origin_guild, request.guild_id
            ),
        });
    }

    let actor = &request.actor;
    if !is_authorized(
        actor.id,
        &actor.roles,
        request.owner_id,
        request.configured_role,
        request.default_role,
    ) {
        info!(
            "Denied {} on user {} to {} ({}) in guild {}",
            payload.action, payload.subject, actor.name, actor.id, request.guild_id
        );
        surface.deny(DENIED_MESSAGE).await?;
        return Ok(DecisionOutcome::Denied);
    }

    let enforced = match payload.action {
        DecisionAction::AcceptBan => {
            let reason = enforcement_reason(payload.action, &actor.name);
            surface.ban(request.guild_id, payload.subject, &reason).await
        }
        DecisionAction::AcceptUnban => {
            let reason = enforcement_reason(payload.action, &actor.name);
            surface.unban(request.guild_id, payload.subject, &reason).await
        }
        DecisionAction::RejectBlacklist | DecisionAction::RejectUnblacklist => Ok(()),
    };

    if let Err(e) = enforced {
        warn!(
            "Could not apply {} to user {} in guild {}: {}",
            payload.action, payload.subject, request.guild_id, e
        );
        surface.report_failure(&failure_message(payload.action, &e)).await?;
        return Ok(DecisionOutcome::ActionFailed);
    }

    surface
        .finalize(&resolution_for(payload.action, &actor.name, decided_at))
        .await?;
    info!(
        "{} ({}) decided {} on user {} in guild {}",
        actor.name, actor.id, payload.action, payload.subject, request.guild_id
    );

    // The decision already stands once the notice is rewritten
    if let Err(e) = surface.announce(&announcement(payload.action, &actor.name)).await {
        warn!("Failed to announce decision in guild {}: {}", request.guild_id, e);
    }

    Ok(DecisionOutcome::Completed(payload.action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const GUILD: u64 = 10;
    const OWNER: u64 = 1;
    const REVIEWER_ROLE: u64 = 500;
    const DEFAULT_ROLE: u64 = 600;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Deny(String),
        Failure(String),
        Ban(UserId, String),
        Unban(UserId, String),
        Finalize(Resolution),
        Announce(String),
    }

    #[derive(Default)]
    struct FakeSurface {
        calls: Mutex<Vec<Call>>,
        forbid_enforcement: bool,
    }

    impl FakeSurface {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn enforced(&self) -> bool {
            self.calls()
                .iter()
                .any(|call| matches!(call, Call::Ban(..) | Call::Unban(..)))
        }

        fn finalized(&self) -> usize {
            self.calls()
                .iter()
                .filter(|call| matches!(call, Call::Finalize(_)))
                .count()
        }

        fn enforce(&self, call: Call) -> Result<()> {
            self.record(call);
            if self.forbid_enforcement {
                return Err(BotError::PermissionDenied {
                    message: "Missing Permissions".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DecisionSurface for FakeSurface {
        async fn deny(&self, message: &str) -> Result<()> {
            self.record(Call::Deny(message.to_string()));
            Ok(())
        }

        async fn report_failure(&self, message: &str) -> Result<()> {
            self.record(Call::Failure(message.to_string()));
            Ok(())
        }

        async fn ban(&self, _guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
            self.enforce(Call::Ban(user_id, reason.to_string()))
        }

        async fn unban(&self, _guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
            self.enforce(Call::Unban(user_id, reason.to_string()))
        }

        async fn finalize(&self, resolution: &Resolution) -> Result<()> {
            self.record(Call::Finalize(resolution.clone()));
            Ok(())
        }

        async fn announce(&self, message: &str) -> Result<()> {
            self.record(Call::Announce(message.to_string()));
            Ok(())
        }
    }

    fn request(action: DecisionAction, actor_id: u64, roles: &[u64]) -> DecisionRequest {
        DecisionRequest {
            payload: NoticePayload {
                action,
                origin_guild: GuildId::new(GUILD),
                subject: UserId::new(42),
            },
            guild_id: GuildId::new(GUILD),
            owner_id: UserId::new(OWNER),
            actor: Actor {
                id: UserId::new(actor_id),
                name: "Mod".to_string(),
                roles: roles.iter().copied().map(RoleId::new).collect(),
            },
            configured_role: Some(RoleId::new(REVIEWER_ROLE)),
            default_role: Some(RoleId::new(DEFAULT_ROLE)),
        }
    }

    #[test]
    fn test_authorization_rules() {
        let owner = UserId::new(OWNER);
        let member = UserId::new(2);
        let reviewer = [RoleId::new(REVIEWER_ROLE)];
        let default = [RoleId::new(DEFAULT_ROLE)];

        assert!(is_authorized(owner, &[], owner, None, None));
        assert!(is_authorized(member, &reviewer, owner, Some(reviewer[0]), Some(default[0])));
        // Configured role replaces the default rather than adding to it
        assert!(!is_authorized(member, &default, owner, Some(reviewer[0]), Some(default[0])));
        assert!(is_authorized(member, &default, owner, None, Some(default[0])));
        assert!(!is_authorized(member, &reviewer, owner, None, Some(default[0])));
        assert!(!is_authorized(member, &reviewer, owner, None, None));
    }

    #[tokio::test]
    async fn test_reject_rewrites_without_enforcement() {
        let surface = FakeSurface::default();
        let outcome = handle_decision(
            &surface,
            &request(DecisionAction::RejectBlacklist, 2, &[REVIEWER_ROLE]),
            1_700_000_000,
        )
        .await
        .unwrap();

        assert_eq!(outcome, DecisionOutcome::Completed(DecisionAction::RejectBlacklist));
        assert!(!surface.enforced());
        assert_eq!(
            surface.calls(),
            vec![
                Call::Finalize(Resolution {
                    title: "🚫 Blacklist Rejected",
                    color: COLOR_REJECTED,
                    fields: vec![
                        ("Decision".to_string(), "Rejected by Mod".to_string()),
                        ("Decided".to_string(), "<t:1700000000:F>".to_string()),
                    ],
                }),
                Call::Announce("Mod has rejected the blacklist.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_accept_ban_enforces_then_finalizes() {
        let surface = FakeSurface::default();
        let outcome = handle_decision(&surface, &request(DecisionAction::AcceptBan, OWNER, &[]), 0)
            .await
            .unwrap();

        assert_eq!(outcome, DecisionOutcome::Completed(DecisionAction::AcceptBan));
        let calls = surface.calls();
        assert_eq!(
            calls[0],
            Call::Ban(UserId::new(42), "Blacklist accepted by Mod".to_string())
        );
        match &calls[1] {
            Call::Finalize(resolution) => {
                assert_eq!(resolution.title, "🚫 User Banned");
                assert_eq!(resolution.fields[0].1, "Banned by Mod");
                assert_eq!(resolution.fields[1].1, "Blacklist accepted by Mod");
            }
            other => panic!("expected finalize, got {:?}", other),
        }
        assert_eq!(calls[2], Call::Announce("Mod has banned the user.".to_string()));
        assert_eq!(surface.finalized(), 1);
    }

    #[tokio::test]
    async fn test_accept_unban_uses_unban() {
        let surface = FakeSurface::default();
        handle_decision(&surface, &request(DecisionAction::AcceptUnban, 2, &[REVIEWER_ROLE]), 0)
            .await
            .unwrap();

        assert_eq!(
            surface.calls()[0],
            Call::Unban(UserId::new(42), "Unblacklist accepted by Mod".to_string())
        );
        assert_eq!(surface.finalized(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_actor_never_enforces() {
        for action in DecisionAction::ALL {
            let surface = FakeSurface::default();
            let outcome = handle_decision(&surface, &request(action, 3, &[DEFAULT_ROLE]), 0)
                .await
                .unwrap();

            assert_eq!(outcome, DecisionOutcome::Denied);
            assert_eq!(surface.calls(), vec![Call::Deny(DENIED_MESSAGE.to_string())]);
        }
    }

    #[tokio::test]
    async fn test_default_role_applies_when_none_configured() {
        let surface = FakeSurface::default();
        let mut req = request(DecisionAction::AcceptBan, 3, &[DEFAULT_ROLE]);
        req.configured_role = None;

        let outcome = handle_decision(&surface, &req, 0).await.unwrap();
        assert_eq!(outcome, DecisionOutcome::Completed(DecisionAction::AcceptBan));
        assert!(surface.enforced());
    }

    #[tokio::test]
    async fn test_enforcement_failure_keeps_controls() {
        let surface = FakeSurface {
            forbid_enforcement: true,
            ..Default::default()
        };
        let outcome = handle_decision(&surface, &request(DecisionAction::AcceptBan, OWNER, &[]), 0)
            .await
            .unwrap();

        assert_eq!(outcome, DecisionOutcome::ActionFailed);
        assert_eq!(surface.finalized(), 0);
        assert!(surface
            .calls()
            .contains(&Call::Failure("❌ I don't have permission to ban members.".to_string())));
    }

    #[tokio::test]
    async fn test_notice_from_other_guild_is_rejected() {
        let surface = FakeSurface::default();
        let mut req = request(DecisionAction::AcceptBan, OWNER, &[]);
        req.guild_id = GuildId::new(GUILD + 1);

        let err = handle_decision(&surface, &req, 0).await.unwrap_err();
        assert!(matches!(err, BotError::MalformedNotice { .. }));
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn test_announcements() {
        assert_eq!(
            announcement(DecisionAction::AcceptUnban, "Alex"),
            "Alex has unbanned the user."
        );
        assert_eq!(
            announcement(DecisionAction::RejectUnblacklist, "Alex"),
            "Alex has rejected the unblacklist."
        );
    }
}
