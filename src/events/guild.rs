use poise::serenity_prelude as serenity;
use tracing::{debug, info};

use crate::{Data, Error};

/// Handle when the bot joins a new guild or starts up
pub async fn handle_guild_create(
    _ctx: &serenity::Context,
    guild: &serenity::Guild,
    data: &Data,
) -> Result<(), Error> {
    let mut store = data.store.write().await;
    if store.contains(guild.id) {
        debug!("Guild {} ({}) already has state", guild.name, guild.id);
        return Ok(());
    }

    info!("Joined guild: {} ({})", guild.name, guild.id);
    store.ensure(guild.id);
    store.flush().await?;
    Ok(())
}
