use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};

use crate::settings::SettingsDefaults;

/// Process-wide settings read from the environment (optionally seeded from `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub defaults: SettingsDefaults,
    pub sweep_interval: Duration,
    pub workers: usize,
    pub page_size: usize,
    pub database_url: String,
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub file: Option<PathBuf>,
    pub randomized: bool,
    /// Add `prefix + name` of every command to the rotation.
    pub include_commands: bool,
    pub command_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: SettingsDefaults::default(),
            sweep_interval: Duration::from_secs(30),
            workers: 16,
            page_size: 10,
            database_url: "guildbox.db".to_string(),
            activity: ActivityConfig {
                enabled: true,
                interval: Duration::from_secs(60),
                file: None,
                randomized: false,
                include_commands: true,
                command_prefix: "$".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or empty keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(ratio) = parse::<u8>(&value, "GUILDBOX_DEFAULT_SKIP_RATIO")? {
            if !(1..=100).contains(&ratio) {
                return Err(anyhow!(
                    "GUILDBOX_DEFAULT_SKIP_RATIO must be between 1 and 100, got {ratio}"
                ));
            }
            config.defaults.skip_ratio = ratio;
        }
        if let Some(secs) = parse_nonzero(&value, "GUILDBOX_VOTE_TIMEOUT_SECS")? {
            config.defaults.vote_timeout = Duration::from_secs(secs);
        }
        if let Some(flag) = parse_flag(&value, "GUILDBOX_SELF_VOTE")? {
            config.defaults.self_vote = flag;
        }
        if let Some(secs) = parse_nonzero(&value, "GUILDBOX_INACTIVITY_SECS")? {
            config.defaults.inactivity = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_nonzero(&value, "GUILDBOX_LEAVE_EMPTY_CHANNEL_SECS")? {
            config.defaults.leave_empty_channel = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_nonzero(&value, "GUILDBOX_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_nonzero(&value, "GUILDBOX_MAX_QUEUE_SIZE")? {
            config.defaults.max_queue_size = size as usize;
        }
        if let Some(workers) = parse_nonzero(&value, "GUILDBOX_WORKERS")? {
            config.workers = workers as usize;
        }
        if let Some(size) = parse_nonzero(&value, "GUILDBOX_PAGE_SIZE")? {
            config.page_size = size as usize;
        }
        if let Some(url) = read_database_url(&value) {
            config.database_url = url;
        }

        if let Some(flag) = parse_flag(&value, "GUILDBOX_ACTIVITY_ENABLED")? {
            config.activity.enabled = flag;
        }
        if let Some(secs) = parse_nonzero(&value, "GUILDBOX_ACTIVITY_INTERVAL_SECS")? {
            config.activity.interval = Duration::from_secs(secs);
        }
        config.activity.file = value("GUILDBOX_ACTIVITY_FILE").map(PathBuf::from);
        if let Some(flag) = parse_flag(&value, "GUILDBOX_ACTIVITY_RANDOMIZED")? {
            config.activity.randomized = flag;
        }
        if let Some(flag) = parse_flag(&value, "GUILDBOX_ACTIVITY_COMMANDS")? {
            config.activity.include_commands = flag;
        }
        if let Some(prefix) = value("GUILDBOX_COMMAND_PREFIX") {
            config.activity.command_prefix = prefix.trim().to_string();
        }

        Ok(config)
    }
}

fn read_database_url(value: &impl Fn(&str) -> Option<String>) -> Option<String> {
    const CANDIDATES: &[&str] = &["GUILDBOX_DATABASE_URL", "DATABASE_URL"];
    for key in CANDIDATES {
        if let Some(url) = value(key) {
            return Some(url);
        }
    }
    None
}

fn parse<T>(value: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: '{raw}'"))
        })
        .transpose()
}

fn parse_nonzero(value: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match parse::<u64>(value, key)? {
        Some(0) => Err(anyhow!("{key} must be greater than zero")),
        other => Ok(other),
    }
}

fn parse_flag(value: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = value(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!("invalid value for {key}: '{raw}' (expected true/false)")),
    }
}
