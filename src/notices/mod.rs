//! Rendering and posting of review notices.

pub mod payload;
pub mod render;

pub use payload::{DecisionAction, NoticePayload};

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::{Cache, ChannelId, CreateMessage, GuildId, Http, MessageId};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::upstream::ModerationEvent;

/// Destination for notices
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether the channel still exists in the guild and can be posted to
    async fn channel_available(&self, guild_id: GuildId, channel_id: ChannelId) -> bool;

    /// Post one notice with its accept/reject controls
    async fn post(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        event: &ModerationEvent,
        display_name: &str,
    ) -> Result<MessageId>;
}

/// Posts notices through the Discord HTTP API
pub struct DiscordNotifier {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(cache: Arc<Cache>, http: Arc<Http>) -> Self {
        Self { cache, http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn channel_available(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let cached = self
            .cache
            .guild(guild_id)
            .map(|guild| guild.channels.contains_key(&channel_id));
        if let Some(found) = cached {
            return found;
        }

        // Guild not cached yet (e.g. right after startup)
        debug!("Guild {} not cached, resolving channel {} over HTTP", guild_id, channel_id);
        match channel_id.to_channel(self.http.as_ref()).await {
            Ok(serenity::Channel::Guild(channel)) => channel.guild_id == guild_id,
            _ => false,
        }
    }

    async fn post(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        event: &ModerationEvent,
        display_name: &str,
    ) -> Result<MessageId> {
        let message = CreateMessage::new()
            .embed(render::notice_embed(event, display_name))
            .components(render::notice_components(guild_id, event));

        let sent = channel_id.send_message(self.http.as_ref(), message).await?;
        Ok(sent.id)
    }
}
