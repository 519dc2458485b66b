//! Periodic poll of the upstream feeds and fan-out of new events to guilds.

use futures::FutureExt;
use poise::serenity_prelude::GuildId;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::notices::Notifier;
use crate::state::{GuildConfig, SharedGuildStore};
use crate::upstream::{EventKind, EventSource, ModerationEvent};

/// What a single cycle did, for logging and tests
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub events_fetched: usize,
    pub guilds_processed: usize,
    pub guilds_skipped: usize,
    pub notices_posted: usize,
    pub notices_failed: usize,
}

/// Ids one guild task attempted to show, per feed
#[derive(Debug, Default)]
struct GuildOutcome {
    guild_id: GuildId,
    skipped: bool,
    blacklist_ids: Vec<String>,
    unblacklist_ids: Vec<String>,
    posted: usize,
    failed: usize,
}

/// Drives the poll cycle and owns its collaborators
pub struct Poller {
    source: Arc<dyn EventSource>,
    notifier: Arc<dyn Notifier>,
    store: SharedGuildStore,
}

impl Poller {
    pub fn new(
        source: Arc<dyn EventSource>,
        notifier: Arc<dyn Notifier>,
        store: SharedGuildStore,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
        }
    }

    /// Run one cycle: fetch both feeds once, fan out to every known guild,
    /// then commit and flush the seen-set updates.
    ///
    /// A fetch failure aborts the cycle before any guild is touched. Every
    /// attempted id is committed to memory before the flush, so a failed flush
    /// never causes a notice to be posted twice.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let (blacklists, unblacklists) = tokio::try_join!(
            self.source.fetch_new_blacklists(),
            self.source.fetch_new_unblacklists()
        )?;

        let events: Arc<Vec<ModerationEvent>> =
            Arc::new(blacklists.into_iter().chain(unblacklists).collect());
        let mut report = CycleReport {
            events_fetched: events.len(),
            ..Default::default()
        };

        let guilds = self.store.read().await.snapshot();
        debug!(
            "Poll cycle: {} events, {} guilds",
            events.len(),
            guilds.len()
        );

        let names = Arc::new(self.resolve_names(&events, &guilds).await);

        let mut tasks = JoinSet::new();
        for (guild_id, config) in guilds {
            let notifier = Arc::clone(&self.notifier);
            let events = Arc::clone(&events);
            let names = Arc::clone(&names);
            tasks.spawn(async move {
                let mut outcome = GuildOutcome {
                    guild_id,
                    ..Default::default()
                };
                let run = process_guild(notifier.as_ref(), &config, &events, &names, &mut outcome);
                if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                    error!(
                        "Poll task for guild {} panicked; keeping its {} attempted ids",
                        guild_id,
                        outcome.blacklist_ids.len() + outcome.unblacklist_ids.len()
                    );
                }
                outcome
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("Guild poll task failed: {}", e),
            }
        }

        // Commit only after every guild task has finished
        let mut store = self.store.write().await;
        for outcome in outcomes {
            if outcome.skipped {
                report.guilds_skipped += 1;
                continue;
            }
            report.guilds_processed += 1;
            report.notices_posted += outcome.posted;
            report.notices_failed += outcome.failed;

            if !outcome.blacklist_ids.is_empty() {
                store
                    .record_seen(outcome.guild_id, EventKind::Blacklist, outcome.blacklist_ids)
                    .await;
            }
            if !outcome.unblacklist_ids.is_empty() {
                store
                    .record_seen(outcome.guild_id, EventKind::Unblacklist, outcome.unblacklist_ids)
                    .await;
            }
        }
        store.flush().await?;

        Ok(report)
    }

    /// Look up each subject once per cycle, only for events some guild with a
    /// log channel has not seen yet. Unknown or unreachable names fall back to
    /// the raw id.
    async fn resolve_names(
        &self,
        events: &[ModerationEvent],
        guilds: &[(GuildId, GuildConfig)],
    ) -> HashMap<String, String> {
        let mut subjects = Vec::new();
        let mut queued = HashSet::new();
        for event in events {
            let wanted = guilds.iter().any(|(_, config)| {
                config.log_channel().is_some() && !config.has_seen(event.kind, &event.event_id)
            });
            if wanted && queued.insert(event.subject_external_id.as_str()) {
                subjects.push(event.subject_external_id.as_str());
            }
        }

        let mut names = HashMap::with_capacity(subjects.len());
        for subject in subjects {
            let name = match self.source.resolve_display_name(subject).await {
                Ok(Some(name)) => name,
                Ok(None) => subject.to_string(),
                Err(e) => {
                    warn!("Could not resolve name for {}: {}", subject, e);
                    subject.to_string()
                }
            };
            names.insert(subject.to_string(), name);
        }
        names
    }

    /// Run cycles on a fixed period until `shutdown` flips to true.
    ///
    /// A cycle that overruns the period delays the next tick instead of
    /// overlapping it. A cycle in progress when shutdown is requested runs to
    /// completion, then pending state is flushed.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Poll loop started (every {:?})", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.run_cycle().await {
                Ok(report) => {
                    if report.notices_posted > 0 || report.notices_failed > 0 {
                        info!(
                            "Poll cycle done: {} posted, {} failed, {} guilds processed, {} skipped",
                            report.notices_posted,
                            report.notices_failed,
                            report.guilds_processed,
                            report.guilds_skipped
                        );
                    } else {
                        debug!("Poll cycle done: nothing new ({} events fetched)", report.events_fetched);
                    }
                }
                Err(e) => error!("Poll cycle skipped: {}", e),
            }

            if *shutdown.borrow() {
                break;
            }
        }

        if let Err(e) = self.store.write().await.flush().await {
            error!("Failed to flush guild state on shutdown: {}", e);
        }
        info!("Poll loop stopped");
    }
}

/// Show every unseen event in one guild, filling `outcome` as it goes. Each
/// id is added before its post is attempted so the caller records it even if
/// the post fails or the task panics; failures are logged, not retried.
async fn process_guild(
    notifier: &dyn Notifier,
    config: &GuildConfig,
    events: &[ModerationEvent],
    names: &HashMap<String, String>,
    outcome: &mut GuildOutcome,
) {
    let guild_id = outcome.guild_id;
    let Some(channel_id) = config.log_channel() else {
        debug!("No log channel configured for guild {}, skipping", guild_id);
        outcome.skipped = true;
        return;
    };

    let unseen: Vec<&ModerationEvent> = events
        .iter()
        .filter(|event| !config.has_seen(event.kind, &event.event_id))
        .collect();
    if unseen.is_empty() {
        return;
    }

    if !notifier.channel_available(guild_id, channel_id).await {
        warn!(
            "Log channel {} not found in guild {}, skipping",
            channel_id, guild_id
        );
        outcome.skipped = true;
        return;
    }

    for event in unseen {
        match event.kind {
            EventKind::Blacklist => outcome.blacklist_ids.push(event.event_id.clone()),
            EventKind::Unblacklist => outcome.unblacklist_ids.push(event.event_id.clone()),
        }

        let display_name = names
            .get(&event.subject_external_id)
            .map(String::as_str)
            .unwrap_or(&event.subject_external_id);

        match notifier.post(guild_id, channel_id, event, display_name).await {
            Ok(message_id) => {
                info!(
                    "Posted {} {} to guild {} (message {})",
                    event.kind, event.event_id, guild_id, message_id
                );
                outcome.posted += 1;
            }
            Err(e) => {
                error!(
                    "Failed to post {} {} to guild {}: {}. It will not be retried.",
                    event.kind, event.event_id, guild_id, e
                );
                outcome.failed += 1;
            }
        }
    }
}
