use poise::serenity_prelude::{ChannelId, GuildId, RoleId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::upstream::EventKind;

/// Per-guild settings and the ids of events already shown in that guild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildConfig {
    #[serde(default, deserialize_with = "optional_snowflake")]
    pub log_channel_id: Option<u64>,

    #[serde(default, deserialize_with = "optional_snowflake")]
    pub moderator_role_id: Option<u64>,

    #[serde(default, serialize_with = "sorted_ids", deserialize_with = "id_set")]
    pub last_seen_blacklist_ids: HashSet<String>,

    #[serde(default, serialize_with = "sorted_ids", deserialize_with = "id_set")]
    pub last_seen_unblacklist_ids: HashSet<String>,
}

impl GuildConfig {
    pub fn log_channel(&self) -> Option<ChannelId> {
        self.log_channel_id.map(ChannelId::new)
    }

    pub fn moderator_role(&self) -> Option<RoleId> {
        self.moderator_role_id.map(RoleId::new)
    }

    pub fn seen(&self, kind: EventKind) -> &HashSet<String> {
        match kind {
            EventKind::Blacklist => &self.last_seen_blacklist_ids,
            EventKind::Unblacklist => &self.last_seen_unblacklist_ids,
        }
    }

    fn seen_mut(&mut self, kind: EventKind) -> &mut HashSet<String> {
        match kind {
            EventKind::Blacklist => &mut self.last_seen_blacklist_ids,
            EventKind::Unblacklist => &mut self.last_seen_unblacklist_ids,
        }
    }

    pub fn has_seen(&self, kind: EventKind, event_id: &str) -> bool {
        self.seen(kind).contains(event_id)
    }
}

/// Durable guild id -> config mapping backed by a single JSON file.
///
/// Mutations are counted as pending updates; `flush` rewrites the whole file
/// through a temporary file and a rename, so a crash never leaves a partial
/// state file behind.
#[derive(Debug)]
pub struct GuildStore {
    path: PathBuf,
    guilds: HashMap<GuildId, GuildConfig>,
    pending_updates: usize,
    flush_threshold: usize,
}

impl GuildStore {
    pub fn new(path: impl Into<PathBuf>, flush_threshold: usize) -> Self {
        Self {
            path: path.into(),
            guilds: HashMap::new(),
            pending_updates: 0,
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Load from file, or start empty if it does not exist yet
    pub async fn load(path: impl Into<PathBuf>, flush_threshold: usize) -> Result<Self> {
        let mut store = Self::new(path, flush_threshold);
        let path_str = store.path.display().to_string();

        let content = match tokio::fs::read_to_string(&store.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No guild state at {}, starting empty", path_str);
                return Ok(store);
            }
            Err(e) => {
                return Err(BotError::StateLoad {
                    path: path_str,
                    source: e,
                })
            }
        };

        let raw: HashMap<String, GuildConfig> =
            serde_json::from_str(&content).map_err(|e| BotError::StateParse {
                path: path_str.clone(),
                source: e,
            })?;

        for (key, config) in raw {
            match key.parse::<u64>() {
                Ok(id) if id != 0 => {
                    store.guilds.insert(GuildId::new(id), config);
                }
                _ => warn!("Ignoring guild state entry with invalid id '{}'", key),
            }
        }

        info!("Loaded state for {} guilds from {}", store.guilds.len(), path_str);
        Ok(store)
    }

    /// Write the full mapping atomically
    pub async fn save(&self) -> Result<()> {
        let path_str = self.path.display().to_string();
        let ordered: BTreeMap<String, &GuildConfig> = self
            .guilds
            .iter()
            .map(|(id, config)| (id.to_string(), config))
            .collect();
        let content = serde_json::to_string_pretty(&ordered)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::StateSave {
                    path: path_str.clone(),
                    source: e,
                })?;
        }

        let temp_path = temp_path_for(&self.path);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str.clone(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str,
                source: e,
            })?;

        Ok(())
    }

    /// Persist if anything changed since the last successful write. On
    /// failure the pending count is kept so the next flush retries.
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending_updates == 0 {
            return Ok(());
        }
        self.save().await?;
        debug!(
            "Flushed {} pending guild state updates to {}",
            self.pending_updates,
            self.path.display()
        );
        self.pending_updates = 0;
        Ok(())
    }

    /// Get or create the config for a guild
    pub fn ensure(&mut self, guild_id: GuildId) -> &mut GuildConfig {
        if !self.guilds.contains_key(&guild_id) {
            info!("Creating guild state for {}", guild_id);
            self.pending_updates += 1;
        }
        self.guilds.entry(guild_id).or_default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<&GuildConfig> {
        self.guilds.get(&guild_id)
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// Copy of every guild's config, for work done without holding the lock
    pub fn snapshot(&self) -> Vec<(GuildId, GuildConfig)> {
        self.guilds
            .iter()
            .map(|(id, config)| (*id, config.clone()))
            .collect()
    }

    pub fn set_log_channel(&mut self, guild_id: GuildId, channel_id: ChannelId) {
        self.ensure(guild_id).log_channel_id = Some(channel_id.get());
        self.pending_updates += 1;
    }

    pub fn set_moderator_role(&mut self, guild_id: GuildId, role_id: RoleId) {
        self.ensure(guild_id).moderator_role_id = Some(role_id.get());
        self.pending_updates += 1;
    }

    /// Mark events as shown in a guild. Flushes once enough updates queue up.
    ///
    /// The ids are always kept in memory; a failed threshold flush is logged
    /// and the updates stay pending for the next flush.
    pub async fn record_seen<I>(&mut self, guild_id: GuildId, kind: EventKind, event_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        let seen = self.ensure(guild_id).seen_mut(kind);
        let mut added = 0;
        for id in event_ids {
            if seen.insert(id) {
                added += 1;
            }
        }

        if added > 0 {
            debug!("Recorded {} new {} ids for guild {}", added, kind, guild_id);
            self.pending_updates += 1;
        }

        if self.pending_updates >= self.flush_threshold {
            if let Err(e) = self.flush().await {
                warn!(
                    "Deferred flush of {} guild state updates: {}",
                    self.pending_updates, e
                );
            }
        }
    }

    pub fn pending_updates(&self) -> usize {
        self.pending_updates
    }
}

/// Shared guild store type
pub type SharedGuildStore = Arc<tokio::sync::RwLock<GuildStore>>;

pub fn create_shared_guild_store(store: GuildStore) -> SharedGuildStore {
    Arc::new(tokio::sync::RwLock::new(store))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

// Older state files stored ids as JSON numbers
fn optional_snowflake<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawId::Number(n)) => Some(n),
        Some(RawId::Text(s)) => s.trim().parse().ok(),
        None => None,
    }
    .filter(|id| *id != 0))
}

fn id_set<'de, D>(deserializer: D) -> std::result::Result<HashSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawId>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(RawId::into_string)
        .collect())
}

fn sorted_ids<S>(ids: &HashSet<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    sorted.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("guild_config.json")
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GuildStore::load(state_path(&dir), 5).await.unwrap();
        assert!(store.snapshot().is_empty());
        assert_eq!(store.pending_updates(), 0);
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let guild = GuildId::new(1001);
        let other = GuildId::new(1002);

        let mut store = GuildStore::new(&path, 5);
        store.set_log_channel(guild, ChannelId::new(2001));
        store.set_moderator_role(guild, RoleId::new(3001));
        store
            .record_seen(guild, EventKind::Blacklist, vec!["E1".to_string(), "E2".to_string()])
            .await;
        store
            .record_seen(guild, EventKind::Unblacklist, vec!["U1".to_string()])
            .await;
        store.ensure(other);
        store.save().await.unwrap();

        let loaded = GuildStore::load(&path, 5).await.unwrap();
        assert_eq!(loaded.get(guild), store.get(guild));
        assert_eq!(loaded.get(other), Some(&GuildConfig::default()));

        let config = loaded.get(guild).unwrap();
        assert_eq!(config.log_channel(), Some(ChannelId::new(2001)));
        assert_eq!(config.moderator_role(), Some(RoleId::new(3001)));
        assert!(config.has_seen(EventKind::Blacklist, "E2"));
        assert!(!config.has_seen(EventKind::Unblacklist, "E2"));
        assert!(!temp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);

        let mut store = GuildStore::new(&path, 5);
        store.set_log_channel(GuildId::new(7), ChannelId::new(8));
        store
            .record_seen(GuildId::new(7), EventKind::Blacklist, vec!["b".to_string(), "a".to_string()])
            .await;
        store.save().await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            serde_json::json!({
                "7": {
                    "logChannelId": 8,
                    "moderatorRoleId": null,
                    "lastSeenBlacklistIds": ["a", "b"],
                    "lastSeenUnblacklistIds": []
                }
            })
        );
    }

    #[tokio::test]
    async fn test_loads_legacy_numeric_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        std::fs::write(
            &path,
            r#"{
                "55": {
                    "logChannelId": "66",
                    "moderatorRoleId": null,
                    "lastSeenBlacklistIds": [1, 2, "3"]
                },
                "not-a-guild": {}
            }"#,
        )
        .unwrap();

        let store = GuildStore::load(&path, 5).await.unwrap();
        let config = store.get(GuildId::new(55)).unwrap();
        assert_eq!(config.log_channel(), Some(ChannelId::new(66)));
        assert!(config.has_seen(EventKind::Blacklist, "1"));
        assert!(config.has_seen(EventKind::Blacklist, "3"));
        assert!(config.last_seen_unblacklist_ids.is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_and_left_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        std::fs::write(&path, "{ not json").unwrap();

        let err = GuildStore::load(&path, 5).await.unwrap_err();
        assert!(matches!(err, BotError::StateParse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_record_seen_flushes_at_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = state_path(&dir);
        let mut store = GuildStore::new(&path, 2);

        let guild = GuildId::new(1);
        store
            .record_seen(guild, EventKind::Blacklist, vec!["E1".to_string()])
            .await;
        // ensure() + the insert count as two updates
        assert_eq!(store.pending_updates(), 0);
        assert!(path.exists());

        store
            .record_seen(guild, EventKind::Blacklist, vec!["E1".to_string()])
            .await;
        assert_eq!(store.pending_updates(), 0);

        store
            .record_seen(guild, EventKind::Blacklist, vec!["E2".to_string()])
            .await;
        assert_eq!(store.pending_updates(), 1);

        store.flush().await.unwrap();
        assert_eq!(store.pending_updates(), 0);
        let loaded = GuildStore::load(&path, 2).await.unwrap();
        assert!(loaded.get(guild).unwrap().has_seen(EventKind::Blacklist, "E2"));
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_pending_updates() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let mut store = GuildStore::new(blocker.join("guild_config.json"), 10);
        store.set_log_channel(GuildId::new(1), ChannelId::new(2));
        let pending = store.pending_updates();

        let err = store.flush().await.unwrap_err();
        assert!(matches!(err, BotError::StateSave { .. }));
        assert_eq!(store.pending_updates(), pending);
    }

    #[tokio::test]
    async fn test_record_seen_keeps_ids_when_threshold_flush_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let mut store = GuildStore::new(blocker.join("guild_config.json"), 1);
        for guild in 1..=3 {
            store
                .record_seen(GuildId::new(guild), EventKind::Blacklist, vec!["E1".to_string()])
                .await;
        }

        for guild in 1..=3 {
            assert!(store
                .get(GuildId::new(guild))
                .unwrap()
                .has_seen(EventKind::Blacklist, "E1"));
        }
        assert!(store.pending_updates() > 0);
    }
}
