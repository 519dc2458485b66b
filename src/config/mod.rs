pub mod settings;
pub mod upstream;

pub use settings::BotSettings;
pub use upstream::{RetryPolicy, UpstreamEndpoints};
