use std::{path::PathBuf, sync::Arc};

use dashmap::DashMap;
use poise::serenity_prelude as serenity;
use serde::{Deserialize, Serialize};
use serenity::prelude::TypeMapKey;
use tracing::warn;

use crate::moderation::{FilterWord, ModerationService};

/// File holding every guild's configuration, relative to the data directory
const GUILD_CONFIG_FILE: &str = "guild_configs.yaml";

/// Guild configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildConfig {
    // The ID of the guild
    pub guild_id: u64,
    // Role given to muted members
    pub mute_role_id: Option<u64>,
    // Channel for public moderation logs
    pub public_log_channel_id: Option<u64>,
    // Channel where filter violations go for human review
    pub report_channel_id: Option<u64>,
    // Channel where throttled lookup commands are always allowed
    pub botspam_channel_id: Option<u64>,
    // Channels the content filter never scans
    pub filter_excluded_channels: Vec<u64>,
    // Guilds whose invite links are allowed
    pub invite_allowlist: Vec<u64>,
    // Role exempt from the newline flood rule
    pub newline_exempt_role_id: Option<u64>,
    // Permission levels granted by roles
    pub role_levels: Vec<RoleLevel>,
    // Banned word list for the content filter
    pub filter_words: Vec<FilterWord>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            guild_id: 0,
            mute_role_id: None,
            public_log_channel_id: None,
            report_channel_id: None,
            botspam_channel_id: None,
            filter_excluded_channels: Vec::new(),
            invite_allowlist: Vec::new(),
            newline_exempt_role_id: None,
            role_levels: Vec::new(),
            filter_words: Vec::new(),
        }
    }
}

impl GuildConfig {
    /// Create an empty configuration for a guild
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    /// Highest permission level granted by any of the given roles.
    ///
    /// Users with no configured role have level 0.
    #[must_use]
    pub fn level_for(&self, roles: &[u64]) -> u8 {
        self.role_levels
            .iter()
            .filter(|grant| roles.contains(&grant.role_id))
            .map(|grant| grant.level)
            .max()
            .unwrap_or(0)
    }
}

/// Permission level granted by holding a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLevel {
    pub role_id: u64,
    pub level: u8,
}

/// Shared store of guild configurations
#[derive(Clone, Default)]
pub struct ConfigStore {
    inner: Arc<ConfigStoreInner>,
}

#[derive(Default)]
struct ConfigStoreInner {
    // Map of guild_id -> guild configuration
    guilds: DashMap<u64, GuildConfig>,
    // Where the config file lives, None for memory-only stores
    data_dir: Option<PathBuf>,
}

impl ConfigStore {
    /// Create an empty in-memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load guild configurations from the YAML file under `data_dir`.
    ///
    /// A missing file is an empty store; an unreadable one is logged and
    /// skipped.
    pub async fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let store = Self {
            inner: Arc::new(ConfigStoreInner {
                guilds: DashMap::new(),
                data_dir: Some(data_dir.clone()),
            }),
        };

        let path = data_dir.join(GUILD_CONFIG_FILE);
        if let Ok(file_content) = tokio::fs::read_to_string(&path).await {
            match serde_yaml::from_str::<Vec<GuildConfig>>(&file_content) {
                Ok(configs) => {
                    for config in configs {
                        store.inner.guilds.insert(config.guild_id, config);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable guild config file");
                }
            }
        }

        store
    }

    /// Configuration for a guild, a fresh default if none is stored
    #[must_use]
    pub fn guild(&self, guild_id: u64) -> GuildConfig {
        self.inner
            .guilds
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| GuildConfig::new(guild_id))
    }

    /// Insert or replace a guild's configuration
    pub fn upsert(&self, config: GuildConfig) {
        self.inner.guilds.insert(config.guild_id, config);
    }

    /// Number of configured guilds
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.guilds.len()
    }

    /// Whether no guild is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.guilds.is_empty()
    }

    /// Directory the store was loaded from, if any
    #[must_use]
    pub fn data_dir(&self) -> Option<&std::path::Path> {
        self.inner.data_dir.as_deref()
    }
}

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data {
    /// Per-guild configuration
    pub configs: ConfigStore,
    /// Handle to the moderation engine
    pub moderation: ModerationService,
}

impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data").finish_non_exhaustive()
    }
}

impl Data {
    /// Bundle the config store and moderation service
    #[must_use]
    pub fn new(configs: ConfigStore, moderation: ModerationService) -> Self {
        Self { configs, moderation }
    }
}

/// Tests for the data module
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guild_config_default() {
        let config = GuildConfig::default();
        assert_eq!(config.guild_id, 0);
        assert!(config.mute_role_id.is_none());
        assert!(config.filter_excluded_channels.is_empty());
        assert!(config.filter_words.is_empty());
    }

    #[test]
    fn test_level_for_picks_highest_grant() {
        let config = GuildConfig {
            guild_id: 1,
            role_levels: vec![
                RoleLevel { role_id: 10, level: 1 },
                RoleLevel { role_id: 20, level: 5 },
                RoleLevel { role_id: 30, level: 7 },
            ],
            ..Default::default()
        };

        assert_eq!(config.level_for(&[10, 20]), 5);
        assert_eq!(config.level_for(&[30]), 7);
        assert_eq!(config.level_for(&[99]), 0);
        assert_eq!(config.level_for(&[]), 0);
    }

    #[test]
    fn test_guild_config_serialization() {
        let config = GuildConfig {
            guild_id: 12345,
            mute_role_id: Some(67890),
            public_log_channel_id: Some(54321),
            invite_allowlist: vec![11111],
            role_levels: vec![RoleLevel { role_id: 10, level: 5 }],
            filter_words: vec![FilterWord {
                word: "badword".to_string(),
                bypass_level: 5,
                notify: true,
                literal_only: false,
            }],
            ..Default::default()
        };

        // Test serialization
        let serialized = serde_yaml::to_string(&config).expect("Failed to serialize");
        assert!(serialized.contains("guild_id: 12345"));
        assert!(serialized.contains("mute_role_id: 67890"));
        assert!(serialized.contains("word: badword"));

        // Test deserialization
        let deserialized: GuildConfig =
            serde_yaml::from_str(&serialized).expect("Failed to deserialize");
        assert_eq!(deserialized.guild_id, 12345);
        assert_eq!(deserialized.mute_role_id, Some(67890));
        assert_eq!(deserialized.invite_allowlist, vec![11111]);
        assert_eq!(deserialized.filter_words.len(), 1);
        assert!(deserialized.filter_words[0].notify);
    }

    #[test]
    fn test_config_store_defaults_unknown_guilds() {
        let store = ConfigStore::new();
        assert!(store.is_empty());

        let config = store.guild(42);
        assert_eq!(config.guild_id, 42);
        assert!(config.mute_role_id.is_none());
    }

    #[test]
    fn test_config_store_upsert_and_fetch() {
        let store = ConfigStore::new();
        store.upsert(GuildConfig {
            guild_id: 7,
            mute_role_id: Some(100),
            ..Default::default()
        });

        assert_eq!(store.len(), 1);
        assert_eq!(store.guild(7).mute_role_id, Some(100));
    }

    #[tokio::test]
    async fn test_config_store_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let configs = vec![GuildConfig {
            guild_id: 99,
            botspam_channel_id: Some(555),
            ..Default::default()
        }];
        let yaml = serde_yaml::to_string(&configs).expect("serialize");
        tokio::fs::write(dir.path().join(GUILD_CONFIG_FILE), yaml)
            .await
            .expect("write");

        let store = ConfigStore::load(dir.path()).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.guild(99).botspam_channel_id, Some(555));
        assert_eq!(store.data_dir(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_config_store_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load(dir.path()).await;
        assert!(store.is_empty());
    }
}
