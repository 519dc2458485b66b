pub mod guild;
pub mod interaction;

pub use guild::handle_guild_create;
pub use interaction::handle_component;
