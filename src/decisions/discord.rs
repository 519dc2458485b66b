use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{
    ComponentInteraction, CreateEmbed, CreateInteractionResponseFollowup, EditInteractionResponse,
    GuildId, UserId,
};

use super::{DecisionSurface, Resolution};
use crate::error::{BotError, Result};

/// Days of the banned user's message history to delete
const BAN_DELETE_MESSAGE_DAYS: u8 = 7;

/// Decision surface backed by a deferred component interaction
pub struct DiscordSurface<'a> {
    ctx: &'a serenity::Context,
    interaction: &'a ComponentInteraction,
}

impl<'a> DiscordSurface<'a> {
    pub fn new(ctx: &'a serenity::Context, interaction: &'a ComponentInteraction) -> Self {
        Self { ctx, interaction }
    }

    async fn followup(&self, message: &str, ephemeral: bool) -> Result<()> {
        self.interaction
            .create_followup(
                &self.ctx.http,
                CreateInteractionResponseFollowup::new()
                    .content(message)
                    .ephemeral(ephemeral),
            )
            .await?;
        Ok(())
    }
}

/// 403 from Discord means the bot lacks the permission or role hierarchy
fn enforcement_error(err: serenity::Error) -> BotError {
    if let serenity::Error::Http(http_err) = &err {
        if http_err.status_code().map(|status| status.as_u16()) == Some(403) {
            return BotError::PermissionDenied {
                message: err.to_string(),
            };
        }
    }
    err.into()
}

#[async_trait]
impl DecisionSurface for DiscordSurface<'_> {
    async fn deny(&self, message: &str) -> Result<()> {
        self.followup(message, true).await
    }

    async fn report_failure(&self, message: &str) -> Result<()> {
        self.followup(message, true).await
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        guild_id
            .ban_with_reason(&self.ctx.http, user_id, BAN_DELETE_MESSAGE_DAYS, reason)
            .await
            .map_err(enforcement_error)
    }

    async fn unban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> Result<()> {
        self.ctx
            .http
            .remove_ban(guild_id, user_id, Some(reason))
            .await
            .map_err(enforcement_error)
    }

    async fn finalize(&self, resolution: &Resolution) -> Result<()> {
        let mut embed = self
            .interaction
            .message
            .embeds
            .first()
            .cloned()
            .map(CreateEmbed::from)
            .unwrap_or_default()
            .title(resolution.title)
            .color(resolution.color);
        for (name, value) in &resolution.fields {
            embed = embed.field(name, value, false);
        }

        self.interaction
            .edit_response(
                &self.ctx.http,
                EditInteractionResponse::new()
                    .embed(embed)
                    .components(Vec::new()),
            )
            .await?;
        Ok(())
    }

    async fn announce(&self, message: &str) -> Result<()> {
        self.followup(message, false).await
    }
}
