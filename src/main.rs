use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

/// Discord bot that posts upstream blacklist changes for moderator review
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to register commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,

    /// Seconds between upstream polls (overrides POLL_INTERVAL_SECS)
    #[arg(long)]
    poll_interval: Option<u64>,
}

mod commands;
mod config;
mod decisions;
mod error;
mod events;
mod notices;
mod poller;
mod state;
mod upstream;

use commands::{blacklist, help, ping};
use config::BotSettings;
use events::{handle_component, handle_guild_create};
use notices::DiscordNotifier;
use poller::Poller;
use state::{create_shared_guild_store, GuildStore, SharedGuildStore};
use upstream::UpstreamClient;

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// How long shutdown waits for an in-flight poll cycle
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared application state
pub struct Data {
    pub store: SharedGuildStore,
    pub settings: BotSettings,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            if let Err(e) = handle_guild_create(ctx, guild, data).await {
                error!("Failed to handle guild create: {}", e);
            }
        }
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } => {
            if let Err(e) = handle_component(ctx, component, data).await {
                error!("Failed to handle component interaction: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .init();

    let mut settings = BotSettings::from_env()?;
    if let Some(secs) = args.poll_interval {
        settings.poll.interval = Duration::from_secs(secs);
        settings.validate()?;
    }
    match settings.default_reviewer_role {
        Some(role) => info!("Default reviewer role: {}", role),
        None => warn!("DEFAULT_STAFF not set: guilds without a moderator role only accept decisions from the owner"),
    }

    // Load state; refuse to start on a file we cannot parse
    info!("Loading guild state from {}...", settings.state_file.display());
    let store = GuildStore::load(&settings.state_file, settings.poll.flush_threshold).await?;
    let shared_store = create_shared_guild_store(store);

    let http_client = UpstreamClient::build_http(settings.request_timeout)?;
    let upstream = Arc::new(UpstreamClient::new(
        http_client,
        settings.endpoints.clone(),
        settings.retry,
    ));

    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (poller_done_tx, poller_done_rx) = oneshot::channel::<()>();

    let setup_store = shared_store.clone();
    let setup_settings = settings.clone();
    let token = settings.token.clone();

    // Build framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping(), help(), blacklist()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.send(poise::CreateReply::default()
                                .content("You don't have permission to use this command.")
                                .ephemeral(true))
                                .await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                {
                    let mut store = setup_store.write().await;
                    for guild in &ready.guilds {
                        store.ensure(guild.id);
                    }
                    if let Err(e) = store.flush().await {
                        error!("Failed to persist guild state after login: {}", e);
                    }
                }

                // Determine which guilds to register commands for
                let guilds_to_register: Vec<serenity::GuildId> = if let Some(gid) = target_guild_id {
                    vec![serenity::GuildId::new(gid)]
                } else {
                    ready.guilds.iter().map(|g| g.id).collect()
                };

                if guild_commands || target_guild_id.is_some() {
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                let notifier = Arc::new(DiscordNotifier::new(ctx.cache.clone(), ctx.http.clone()));
                let poller = Arc::new(Poller::new(upstream, notifier, setup_store.clone()));
                let interval = setup_settings.poll.interval;
                tokio::spawn(async move {
                    poller.run(interval, shutdown_rx).await;
                    let _ = poller_done_tx.send(());
                });

                Ok(Data {
                    store: setup_store,
                    settings: setup_settings,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_store = shared_store.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested, stopping poll loop...");
        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(SHUTDOWN_GRACE, poller_done_rx).await {
            Ok(_) => info!("Poll loop drained"),
            Err(_) => warn!("Poll loop did not stop within {:?}", SHUTDOWN_GRACE),
        }
        let mut store = shutdown_store.write().await;
        if store.pending_updates() > 0 {
            info!("Flushing {} pending guild state updates", store.pending_updates());
        }
        if let Err(e) = store.flush().await {
            error!("Failed to flush guild state: {}", e);
        }
        drop(store);
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    client.start().await?;
    warn!("Bot ended.");

    Ok(())
}
