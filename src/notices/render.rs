use poise::serenity_prelude as serenity;
use serenity::{CreateActionRow, CreateButton, CreateEmbed, GuildId};

use super::payload::{DecisionAction, NoticePayload};
use crate::upstream::{EventKind, ModerationEvent};

pub const COLOR_BLACKLIST: u32 = 0xe74c3c;
pub const COLOR_UNBLACKLIST: u32 = 0x2ecc71;
pub const COLOR_BANNED: u32 = 0x992d22;
pub const COLOR_UNBANNED: u32 = 0x1f8b4c;
pub const COLOR_REJECTED: u32 = 0x607d8b;

const SECONDS_PER_DAY: i64 = 86_400;

/// Embed for a freshly detected event
pub fn notice_embed(event: &ModerationEvent, display_name: &str) -> CreateEmbed {
    let mention = format!("<@{}>", event.subject_platform_id);

    match event.kind {
        EventKind::Blacklist => {
            let mut embed = CreateEmbed::new()
                .title("🚫 New Blacklist Detected")
                .color(COLOR_BLACKLIST)
                .timestamp(serenity::Timestamp::now())
                .field("Minecraft UUID", format!("`{}`", event.subject_external_id), false)
                .field("Minecraft Username", display_name, false)
                .field("Discord User", mention, false)
                .field("Offense Type", &event.offense, true)
                .field("Ban Date", &event.effective_date, true);

            if let Some(duration) = event.duration_seconds.and_then(format_ban_duration) {
                embed = embed.field("Ban Duration", duration, true);
            }
            embed
        }
        EventKind::Unblacklist => CreateEmbed::new()
            .title("✅ Unblacklist Detected")
            .color(COLOR_UNBLACKLIST)
            .timestamp(serenity::Timestamp::now())
            .field(
                "Offender UUID → username",
                format!("{} ({})", display_name, event.subject_external_id),
                false,
            )
            .field("Offender ID → <@discord_id>", mention, false)
            .field("Offense", &event.offense, false)
            .field("Unban Date", &event.effective_date, true),
    }
}

/// Payloads for the two controls of a notice, accept first
pub fn notice_payloads(guild_id: GuildId, event: &ModerationEvent) -> [NoticePayload; 2] {
    DecisionAction::controls_for(event.kind).map(|action| NoticePayload {
        action,
        origin_guild: guild_id,
        subject: event.subject_platform_id,
    })
}

/// Accept/reject buttons carrying the decision payload
pub fn notice_components(guild_id: GuildId, event: &ModerationEvent) -> Vec<CreateActionRow> {
    let buttons = notice_payloads(guild_id, event)
        .into_iter()
        .map(|payload| {
            let action = payload.action;
            CreateButton::new(payload.custom_id())
                .label(button_label(action))
                .style(if action.is_accept() {
                    serenity::ButtonStyle::Success
                } else {
                    serenity::ButtonStyle::Danger
                })
        })
        .collect();

    vec![CreateActionRow::Buttons(buttons)]
}

pub fn button_label(action: DecisionAction) -> &'static str {
    match action {
        DecisionAction::AcceptBan => "✅ Accept & Ban",
        DecisionAction::AcceptUnban => "✅ Accept & Unban",
        DecisionAction::RejectBlacklist | DecisionAction::RejectUnblacklist => "❌ Reject",
    }
}

/// Upstream sends whole seconds; anything under two days is how the feed
/// marks a permanent ban.
pub fn format_ban_duration(seconds: i64) -> Option<String> {
    if seconds <= 0 {
        return None;
    }
    let days = seconds / SECONDS_PER_DAY;
    Some(if days > 1 {
        format!("{} days", days)
    } else {
        "Permanent".to_string()
    })
}
