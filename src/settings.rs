//! Cache-aside guild settings.
//!
//! Reads come from memory once a guild is loaded. Writes validate first,
//! persist through the repository, and only then replace the cached value, so
//! a failed write never leaves the cache ahead of storage.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    database::SettingsRepository,
    error::{PlayerError, Result},
    types::GuildId,
};

/// Per-guild overrides. `None` means "use the configured default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub skip_ratio: Option<u8>,
    pub vote_timeout_secs: Option<u32>,
    pub max_queue_size: Option<u32>,
    pub auto_disconnect_minutes: Option<u32>,
    pub self_vote: Option<bool>,
    pub leave_empty_channel_secs: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    SkipRatio,
    VoteTimeoutSecs,
    MaxQueueSize,
    AutoDisconnectMinutes,
    SelfVote,
    LeaveEmptyChannelSecs,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::SkipRatio,
        SettingKey::VoteTimeoutSecs,
        SettingKey::MaxQueueSize,
        SettingKey::AutoDisconnectMinutes,
        SettingKey::SelfVote,
        SettingKey::LeaveEmptyChannelSecs,
    ];

    /// Inclusive bounds for numeric keys.
    pub fn bounds(self) -> Option<(u32, u32)> {
        match self {
            Self::SkipRatio => Some((1, 100)),
            Self::VoteTimeoutSecs => Some((5, 300)),
            Self::MaxQueueSize => Some((1, 10_000)),
            Self::AutoDisconnectMinutes => Some((1, 1_440)),
            Self::LeaveEmptyChannelSecs => Some((10, 3_600)),
            Self::SelfVote => None,
        }
    }

    fn validate(self, value: SettingValue) -> Result<()> {
        match (self.bounds(), value) {
            (Some((min, max)), SettingValue::Number(n)) if (min..=max).contains(&n) => Ok(()),
            (Some((min, max)), SettingValue::Number(n)) => Err(PlayerError::Validation(format!(
                "{self} must be between {min} and {max}, got {n}"
            ))),
            (None, SettingValue::Flag(_)) => Ok(()),
            (_, value) => Err(PlayerError::Validation(format!(
                "{self} does not accept {value:?}"
            ))),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SkipRatio => "skip_ratio",
            Self::VoteTimeoutSecs => "vote_timeout_secs",
            Self::MaxQueueSize => "max_queue_size",
            Self::AutoDisconnectMinutes => "auto_disconnect_minutes",
            Self::SelfVote => "self_vote",
            Self::LeaveEmptyChannelSecs => "leave_empty_channel_secs",
        })
    }
}

impl FromStr for SettingKey {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|key| key.to_string() == normalized)
            .ok_or_else(|| PlayerError::Validation(format!("unknown setting '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(u32),
    Flag(bool),
}

impl SettingValue {
    /// Parses user input for `key`: a number for bounded keys, a flag otherwise.
    pub fn parse_for(key: SettingKey, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if key.bounds().is_some() {
            return raw.parse::<u32>().map(Self::Number).map_err(|_| {
                PlayerError::Validation(format!("{key} expects a number, got '{raw}'"))
            });
        }
        match raw.to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(Self::Flag(true)),
            "off" | "false" | "no" | "0" => Ok(Self::Flag(false)),
            _ => Err(PlayerError::Validation(format!(
                "{key} expects on or off, got '{raw}'"
            ))),
        }
    }
}

impl GuildSettings {
    fn override_for(&self, key: SettingKey) -> Option<SettingValue> {
        match key {
            SettingKey::SkipRatio => self.skip_ratio.map(|v| SettingValue::Number(v.into())),
            SettingKey::VoteTimeoutSecs => self.vote_timeout_secs.map(SettingValue::Number),
            SettingKey::MaxQueueSize => self.max_queue_size.map(SettingValue::Number),
            SettingKey::AutoDisconnectMinutes => {
                self.auto_disconnect_minutes.map(SettingValue::Number)
            }
            SettingKey::SelfVote => self.self_vote.map(SettingValue::Flag),
            SettingKey::LeaveEmptyChannelSecs => {
                self.leave_empty_channel_secs.map(SettingValue::Number)
            }
        }
    }

    /// Applies an already validated value (`None` resets to default).
    fn apply(&mut self, key: SettingKey, value: Option<SettingValue>) {
        let number = match value {
            Some(SettingValue::Number(n)) => Some(n),
            _ => None,
        };
        match key {
            SettingKey::SkipRatio => self.skip_ratio = number.and_then(|n| u8::try_from(n).ok()),
            SettingKey::VoteTimeoutSecs => self.vote_timeout_secs = number,
            SettingKey::MaxQueueSize => self.max_queue_size = number,
            SettingKey::AutoDisconnectMinutes => self.auto_disconnect_minutes = number,
            SettingKey::LeaveEmptyChannelSecs => self.leave_empty_channel_secs = number,
            SettingKey::SelfVote => {
                self.self_vote = match value {
                    Some(SettingValue::Flag(flag)) => Some(flag),
                    _ => None,
                }
            }
        }
    }
}

/// Values used when a guild has no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsDefaults {
    pub skip_ratio: u8,
    pub vote_timeout: Duration,
    pub max_queue_size: usize,
    pub inactivity: Duration,
    pub self_vote: bool,
    /// How long a guild's voice context may sit without listeners before its
    /// session is torn down, playing or not.
    pub leave_empty_channel: Duration,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            skip_ratio: 50,
            vote_timeout: Duration::from_secs(30),
            max_queue_size: 500,
            inactivity: Duration::from_secs(300),
            self_vote: true,
            leave_empty_channel: Duration::from_secs(120),
        }
    }
}

/// Settings with defaults filled in, as the player consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub skip_ratio: u8,
    pub vote_timeout: Duration,
    pub max_queue_size: usize,
    pub inactivity: Duration,
    pub self_vote: bool,
    /// How long a guild's voice context may sit without listeners before its
    /// session is torn down, playing or not.
    pub leave_empty_channel: Duration,
}

impl EffectiveSettings {
    pub fn resolve(settings: &GuildSettings, defaults: &SettingsDefaults) -> Self {
        Self {
            skip_ratio: settings.skip_ratio.unwrap_or(defaults.skip_ratio),
            vote_timeout: settings
                .vote_timeout_secs
                .map(|secs| Duration::from_secs(secs.into()))
                .unwrap_or(defaults.vote_timeout),
            max_queue_size: settings
                .max_queue_size
                .map(|n| n as usize)
                .unwrap_or(defaults.max_queue_size),
            inactivity: settings
                .auto_disconnect_minutes
                .map(|minutes| Duration::from_secs(u64::from(minutes) * 60))
                .unwrap_or(defaults.inactivity),
            self_vote: settings.self_vote.unwrap_or(defaults.self_vote),
            leave_empty_channel: settings
                .leave_empty_channel_secs
                .map(|secs| Duration::from_secs(secs.into()))
                .unwrap_or(defaults.leave_empty_channel),
        }
    }
}

pub struct SettingsCache {
    repository: Arc<dyn SettingsRepository>,
    defaults: SettingsDefaults,
    entries: DashMap<GuildId, GuildSettings>,
    /// Serializes loads and writes per guild; other guilds never wait on it.
    guild_locks: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl SettingsCache {
    pub fn new(repository: Arc<dyn SettingsRepository>, defaults: SettingsDefaults) -> Self {
        Self {
            repository,
            defaults,
            entries: DashMap::new(),
            guild_locks: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> &SettingsDefaults {
        &self.defaults
    }

    fn guild_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.guild_locks.entry(guild_id).or_default().value().clone()
    }

    /// Cached value without touching the repository.
    pub fn cached(&self, guild_id: GuildId) -> Option<GuildSettings> {
        self.entries.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Full settings of a guild, loading them on a cache miss.
    pub async fn snapshot(&self, guild_id: GuildId) -> Result<GuildSettings> {
        if let Some(settings) = self.cached(guild_id) {
            return Ok(settings);
        }
        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;
        // Another task may have filled it while we waited.
        if let Some(settings) = self.cached(guild_id) {
            return Ok(settings);
        }
        let settings = self.repository.load_settings(guild_id).await?;
        self.entries.insert(guild_id, settings.clone());
        Ok(settings)
    }

    /// Effective value of `key`: the guild override or the configured default.
    pub async fn get(&self, guild_id: GuildId, key: SettingKey) -> Result<SettingValue> {
        let settings = self.snapshot(guild_id).await?;
        if let Some(value) = settings.override_for(key) {
            return Ok(value);
        }
        let effective = EffectiveSettings::resolve(&settings, &self.defaults);
        Ok(match key {
            SettingKey::SkipRatio => SettingValue::Number(effective.skip_ratio.into()),
            SettingKey::VoteTimeoutSecs => {
                SettingValue::Number(effective.vote_timeout.as_secs() as u32)
            }
            SettingKey::MaxQueueSize => SettingValue::Number(effective.max_queue_size as u32),
            SettingKey::AutoDisconnectMinutes => {
                SettingValue::Number((effective.inactivity.as_secs() / 60) as u32)
            }
            SettingKey::SelfVote => SettingValue::Flag(effective.self_vote),
            SettingKey::LeaveEmptyChannelSecs => {
                SettingValue::Number(effective.leave_empty_channel.as_secs() as u32)
            }
        })
    }

    pub async fn effective(&self, guild_id: GuildId) -> Result<EffectiveSettings> {
        let settings = self.snapshot(guild_id).await?;
        Ok(EffectiveSettings::resolve(&settings, &self.defaults))
    }

    /// Sets (`Some`) or resets (`None`) one key. Validation happens before any
    /// write; the cache changes only after the repository acknowledged.
    pub async fn set(
        &self,
        guild_id: GuildId,
        key: SettingKey,
        value: Option<SettingValue>,
    ) -> Result<GuildSettings> {
        if let Some(value) = value {
            key.validate(value)?;
        }

        let lock = self.guild_lock(guild_id);
        let _guard = lock.lock().await;

        let current = match self.cached(guild_id) {
            Some(settings) => settings,
            None => self.repository.load_settings(guild_id).await?,
        };
        let mut updated = current.clone();
        updated.apply(key, value);

        if let Err(e) = self.repository.save_settings(guild_id, &updated).await {
            warn!(guild_id = %guild_id, key = %key, "settings write failed: {e}");
            return Err(e);
        }
        self.entries.insert(guild_id, updated.clone());

        match value {
            Some(value) => info!(guild_id = %guild_id, key = %key, ?value, "setting updated"),
            None => info!(guild_id = %guild_id, key = %key, "setting reset to default"),
        }
        Ok(updated)
    }

    /// Drops the cached copy and, unless a read or write still holds it, the
    /// guild's lock; the next read reloads from the repository.
    pub fn invalidate(&self, guild_id: GuildId) {
        self.entries.remove(&guild_id);
        self.guild_locks
            .remove_if(&guild_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemorySettingsRepository;

    const GUILD: GuildId = GuildId(11);

    fn cache() -> (Arc<MemorySettingsRepository>, SettingsCache) {
        let repository = Arc::new(MemorySettingsRepository::new());
        let cache = SettingsCache::new(repository.clone(), SettingsDefaults::default());
        (repository, cache)
    }

    #[tokio::test]
    async fn miss_loads_once_then_serves_from_memory() {
        let (repository, cache) = cache();
        assert_eq!(
            cache.get(GUILD, SettingKey::SkipRatio).await.unwrap(),
            SettingValue::Number(50)
        );
        cache.get(GUILD, SettingKey::SelfVote).await.unwrap();
        cache.effective(GUILD).await.unwrap();
        assert_eq!(repository.loads(), 1);
    }

    #[tokio::test]
    async fn set_is_visible_without_another_load() {
        let (repository, cache) = cache();
        cache
            .set(GUILD, SettingKey::SkipRatio, Some(SettingValue::Number(75)))
            .await
            .unwrap();
        let loads = repository.loads();
        assert_eq!(
            cache.get(GUILD, SettingKey::SkipRatio).await.unwrap(),
            SettingValue::Number(75)
        );
        assert_eq!(repository.loads(), loads);
        assert_eq!(repository.stored(GUILD).unwrap().skip_ratio, Some(75));
    }

    #[tokio::test]
    async fn out_of_range_ratio_changes_nothing() {
        let (repository, cache) = cache();
        cache
            .set(GUILD, SettingKey::SkipRatio, Some(SettingValue::Number(40)))
            .await
            .unwrap();
        let err = cache
            .set(GUILD, SettingKey::SkipRatio, Some(SettingValue::Number(150)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Validation(_)));
        assert_eq!(cache.cached(GUILD).unwrap().skip_ratio, Some(40));
        assert_eq!(repository.stored(GUILD).unwrap().skip_ratio, Some(40));
        assert_eq!(repository.saves(), 1);
    }

    #[tokio::test]
    async fn wrong_value_kind_is_rejected() {
        let (_, cache) = cache();
        assert!(matches!(
            cache
                .set(GUILD, SettingKey::SelfVote, Some(SettingValue::Number(1)))
                .await,
            Err(PlayerError::Validation(_))
        ));
        assert!(matches!(
            cache
                .set(GUILD, SettingKey::SkipRatio, Some(SettingValue::Flag(true)))
                .await,
            Err(PlayerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let (repository, cache) = cache();
        cache
            .set(GUILD, SettingKey::MaxQueueSize, Some(SettingValue::Number(20)))
            .await
            .unwrap();
        repository.fail_writes(true);
        let err = cache
            .set(GUILD, SettingKey::MaxQueueSize, Some(SettingValue::Number(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Persistence(_)));
        assert_eq!(
            cache.get(GUILD, SettingKey::MaxQueueSize).await.unwrap(),
            SettingValue::Number(20)
        );
    }

    #[tokio::test]
    async fn reset_restores_default() {
        let (repository, cache) = cache();
        cache
            .set(GUILD, SettingKey::SkipRatio, Some(SettingValue::Number(90)))
            .await
            .unwrap();
        cache.set(GUILD, SettingKey::SkipRatio, None).await.unwrap();
        assert_eq!(
            cache.get(GUILD, SettingKey::SkipRatio).await.unwrap(),
            SettingValue::Number(50)
        );
        assert_eq!(repository.stored(GUILD).unwrap().skip_ratio, None);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let (repository, cache) = cache();
        cache.snapshot(GUILD).await.unwrap();
        cache.invalidate(GUILD);
        cache.snapshot(GUILD).await.unwrap();
        assert_eq!(repository.loads(), 2);
    }

    #[tokio::test]
    async fn invalidate_releases_per_guild_state() {
        let (_, cache) = cache();
        for guild in 1..=20 {
            cache
                .set(GuildId(guild), SettingKey::SelfVote, Some(SettingValue::Flag(false)))
                .await
                .unwrap();
        }
        assert_eq!(cache.guild_locks.len(), 20);
        for guild in 1..=20 {
            cache.invalidate(GuildId(guild));
        }
        assert!(cache.guild_locks.is_empty());
        assert!(cache.entries.is_empty());

        // A lock still in use stays, so the next writer queues behind it.
        let held = cache.guild_lock(GUILD);
        cache.invalidate(GUILD);
        assert!(Arc::ptr_eq(&held, &cache.guild_lock(GUILD)));
        drop(held);
        cache.invalidate(GUILD);
        assert!(cache.guild_locks.is_empty());
    }

    #[test]
    fn keys_and_values_parse_from_user_input() {
        assert_eq!("skip-ratio".parse::<SettingKey>().unwrap(), SettingKey::SkipRatio);
        assert_eq!("SELF_VOTE".parse::<SettingKey>().unwrap(), SettingKey::SelfVote);
        assert!("volume".parse::<SettingKey>().is_err());
        assert_eq!(
            SettingValue::parse_for(SettingKey::MaxQueueSize, " 40 ").unwrap(),
            SettingValue::Number(40)
        );
        assert_eq!(
            SettingValue::parse_for(SettingKey::SelfVote, "off").unwrap(),
            SettingValue::Flag(false)
        );
        assert!(SettingValue::parse_for(SettingKey::SkipRatio, "lots").is_err());
    }

    #[test]
    fn effective_settings_fill_defaults() {
        let defaults = SettingsDefaults::default();
        let settings = GuildSettings {
            auto_disconnect_minutes: Some(2),
            self_vote: Some(false),
            ..Default::default()
        };
        let effective = EffectiveSettings::resolve(&settings, &defaults);
        assert_eq!(effective.skip_ratio, 50);
        assert_eq!(effective.inactivity, Duration::from_secs(120));
        assert!(!effective.self_vote);
        assert_eq!(effective.leave_empty_channel, Duration::from_secs(120));
    }
}
