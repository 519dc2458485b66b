use poise::serenity_prelude as serenity;
use tracing::{error, info};

use crate::decisions::{self, Actor, DecisionRequest, DecisionSurface, DiscordSurface};
use crate::error::{BotError, Result};
use crate::notices::NoticePayload;
use crate::Data;

/// Route notice button presses to the decision flow. Components that are not
/// notice controls are left alone.
pub async fn handle_component(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    data: &Data,
) -> Result<()> {
    let parsed = NoticePayload::parse(&interaction.data.custom_id);
    if matches!(parsed, Ok(None)) {
        return Ok(());
    }

    // Discord needs an answer within three seconds; bans can take longer
    interaction
        .create_response(&ctx.http, serenity::CreateInteractionResponse::Acknowledge)
        .await?;

    let surface = DiscordSurface::new(ctx, interaction);
    let result = match parsed {
        Ok(Some(payload)) => decide(ctx, interaction, data, &surface, payload).await,
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!(
            "Could not process notice control '{}' from {}: {}",
            interaction.data.custom_id, interaction.user.name, e
        );
        if let Err(reply_err) = surface.report_failure(decisions::GENERIC_FAILURE_MESSAGE).await {
            error!("Failed to report decision failure: {}", reply_err);
        }
    }
    Ok(())
}

async fn decide(
    ctx: &serenity::Context,
    interaction: &serenity::ComponentInteraction,
    data: &Data,
    surface: &DiscordSurface<'_>,
    payload: NoticePayload,
) -> Result<()> {
    let guild_id = interaction.guild_id.ok_or_else(|| BotError::MalformedNotice {
        message: "notice control used outside a guild".to_string(),
    })?;

    let owner_id = guild_owner(ctx, guild_id).await?;
    let configured_role = data
        .store
        .read()
        .await
        .get(guild_id)
        .and_then(|config| config.moderator_role());

    let actor = Actor {
        id: interaction.user.id,
        name: interaction
            .member
            .as_ref()
            .map(|member| member.display_name().to_string())
            .unwrap_or_else(|| interaction.user.name.clone()),
        roles: interaction
            .member
            .as_ref()
            .map(|member| member.roles.clone())
            .unwrap_or_default(),
    };

    let request = DecisionRequest {
        payload,
        guild_id,
        owner_id,
        actor,
        configured_role,
        default_role: data.settings.default_reviewer_role,
    };

    let outcome =
        decisions::handle_decision(surface, &request, chrono::Utc::now().timestamp()).await?;
    info!("Decision on {} in guild {}: {:?}", payload.subject, guild_id, outcome);
    Ok(())
}

async fn guild_owner(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
) -> Result<serenity::UserId> {
    let cached = ctx.cache.guild(guild_id).map(|guild| guild.owner_id);
    if let Some(owner) = cached {
        return Ok(owner);
    }
    let guild = guild_id
        .to_partial_guild(&ctx.http)
        .await
        .map_err(|_| BotError::GuildNotFound {
            id: guild_id.to_string(),
        })?;
    Ok(guild.owner_id)
}
