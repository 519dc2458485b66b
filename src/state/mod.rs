pub mod guild_state;

pub use guild_state::{create_shared_guild_store, GuildConfig, GuildStore, SharedGuildStore};
