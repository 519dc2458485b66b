use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

const SETTINGS_COLOR: u32 = 0x3498db;

/// Blacklist notice settings for this server
#[poise::command(
    slash_command,
    guild_only,
    subcommands("setlogchannel", "setmodrole", "viewsettings"),
    subcommand_required
)]
pub async fn blacklist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the channel blacklist notices are posted to
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_CHANNELS",
    default_member_permissions = "MANAGE_CHANNELS"
)]
pub async fn setlogchannel(
    ctx: Context<'_>,
    #[description = "Channel for blacklist notices"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;

    {
        let mut store = ctx.data().store.write().await;
        store.set_log_channel(guild_id, channel.id);
        store.flush().await?;
    }
    info!("Log channel for guild {} set to {}", guild_id, channel.id);

    ctx.send(poise::CreateReply::default()
        .content(format!("Log channel set to <#{}> for this guild.", channel.id))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Set the role allowed to decide on blacklist notices
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES",
    default_member_permissions = "MANAGE_ROLES"
)]
pub async fn setmodrole(
    ctx: Context<'_>,
    #[description = "Reviewer role"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;

    {
        let mut store = ctx.data().store.write().await;
        store.set_moderator_role(guild_id, role.id);
        store.flush().await?;
    }
    info!("Moderator role for guild {} set to {}", guild_id, role.id);

    ctx.send(poise::CreateReply::default()
        .content(format!("Moderator role set to <@&{}> for this guild.", role.id))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show this server's log channel and moderator role
#[poise::command(slash_command, guild_only)]
pub async fn viewsettings(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;

    let config = ctx.data().store.read().await.get(guild_id).cloned().unwrap_or_default();
    let default_role = ctx.data().settings.default_reviewer_role;

    let embed = serenity::CreateEmbed::new()
        .title("Guild Settings")
        .color(SETTINGS_COLOR)
        .field("Log Channel", channel_text(config.log_channel()), false)
        .field(
            "Moderator Role",
            role_text(config.moderator_role(), default_role),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

fn channel_text(channel: Option<serenity::ChannelId>) -> String {
    channel
        .map(|id| format!("<#{}>", id))
        .unwrap_or_else(|| "Not set".to_string())
}

fn role_text(configured: Option<serenity::RoleId>, default: Option<serenity::RoleId>) -> String {
    match (configured, default) {
        (Some(role), _) => format!("<@&{}>", role),
        (None, Some(default)) => format!("Not set (default: <@&{}>)", default),
        (None, None) => "Not set".to_string(),
    }
}
