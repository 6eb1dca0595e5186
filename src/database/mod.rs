//! Persistent storage for guild settings.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use diesel::{Connection, RunQueryDsl, SqliteConnection};
use parking_lot::Mutex;
use tracing::info;

use crate::{
    error::{PlayerError, Result},
    settings::GuildSettings,
    types::GuildId,
};

pub mod models;
pub mod schema;

use models::GuildSettingsRow;

/// Where guild settings live between restarts.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Settings of a guild; a guild never written yet gets the empty (all default) set.
    async fn load_settings(&self, guild_id: GuildId) -> Result<GuildSettings>;

    async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()>;
}

const CREATE_GUILD_SETTINGS: &str = "CREATE TABLE IF NOT EXISTS guild_settings (
    guild_id TEXT PRIMARY KEY NOT NULL,
    skip_ratio INTEGER,
    vote_timeout_secs INTEGER,
    max_queue_size INTEGER,
    auto_disconnect_minutes INTEGER,
    self_vote BOOLEAN,
    leave_empty_channel_secs INTEGER,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

fn persistence(err: impl std::fmt::Display) -> PlayerError {
    PlayerError::Persistence(err.to_string())
}

/// Opens a sqlite connection and makes sure the settings table exists.
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url).map_err(persistence)?;
    diesel::sql_query(CREATE_GUILD_SETTINGS)
        .execute(&mut conn)
        .map_err(persistence)?;
    Ok(conn)
}

/// Diesel/sqlite backed repository. Queries run on the blocking pool so a slow
/// disk never stalls the async workers.
#[derive(Clone)]
pub struct SqliteSettingsRepository {
    conn: Arc<Mutex<SqliteConnection>>,
}

impl SqliteSettingsRepository {
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = establish_connection(database_url)?;
        info!("Settings database ready at {}", database_url);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> diesel::QueryResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(persistence)?
        .map_err(persistence)
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load_settings(&self, guild_id: GuildId) -> Result<GuildSettings> {
        let key = guild_id.to_string();
        let row = self
            .with_conn(move |conn| GuildSettingsRow::find_by_guild_id(conn, &key))
            .await?;
        Ok(row.map(GuildSettingsRow::into_settings).unwrap_or_default())
    }

    async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        let row = GuildSettingsRow::from_settings(&guild_id.to_string(), settings);
        self.with_conn(move |conn| row.upsert(conn)).await?;
        Ok(())
    }
}

/// In-process repository for tests and headless runs. Counts calls and can be
/// told to reject writes.
#[derive(Default)]
pub struct MemorySettingsRepository {
    rows: DashMap<GuildId, GuildSettings>,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self, guild_id: GuildId) -> Option<GuildSettings> {
        self.rows.get(&guild_id).map(|row| row.value().clone())
    }
}

#[async_trait]
impl SettingsRepository for MemorySettingsRepository {
    async fn load_settings(&self, guild_id: GuildId) -> Result<GuildSettings> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored(guild_id).unwrap_or_default())
    }

    async fn save_settings(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PlayerError::Persistence("write rejected".into()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(guild_id, settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_round_trips_and_upserts() {
        let repository = SqliteSettingsRepository::open(":memory:").unwrap();
        let guild = GuildId(42);
        assert_eq!(
            repository.load_settings(guild).await.unwrap(),
            GuildSettings::default()
        );

        let mut settings = GuildSettings {
            skip_ratio: Some(66),
            self_vote: Some(false),
            leave_empty_channel_secs: Some(45),
            ..Default::default()
        };
        repository.save_settings(guild, &settings).await.unwrap();
        assert_eq!(repository.load_settings(guild).await.unwrap(), settings);

        settings.skip_ratio = None;
        settings.max_queue_size = Some(25);
        repository.save_settings(guild, &settings).await.unwrap();
        assert_eq!(repository.load_settings(guild).await.unwrap(), settings);
        assert_eq!(
            repository.load_settings(GuildId(43)).await.unwrap(),
            GuildSettings::default()
        );
    }
}
