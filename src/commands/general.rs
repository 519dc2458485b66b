use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description("New blacklists and unblacklists are posted to the configured log channel for review.")
        .field("/ping", "Check if the bot is running", false)
        .field("/blacklist setlogchannel", "Set the channel notices are posted to (Manage Channels)", false)
        .field("/blacklist setmodrole", "Set the role allowed to accept or reject notices (Manage Roles)", false)
        .field("/blacklist viewsettings", "Show this server's log channel and moderator role", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
