use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{database::schema::guild_settings, settings::GuildSettings};

#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone, PartialEq)]
#[diesel(table_name = guild_settings)]
#[diesel(primary_key(guild_id))]
#[diesel(treat_none_as_null = true)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct GuildSettingsRow {
    pub guild_id: String,
    pub skip_ratio: Option<i32>,
    pub vote_timeout_secs: Option<i32>,
    pub max_queue_size: Option<i32>,
    pub auto_disconnect_minutes: Option<i32>,
    pub self_vote: Option<bool>,
    pub leave_empty_channel_secs: Option<i32>,
    pub updated_at: NaiveDateTime,
}

impl GuildSettingsRow {
    pub fn from_settings(guild_id: &str, settings: &GuildSettings) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            skip_ratio: settings.skip_ratio.map(i32::from),
            vote_timeout_secs: settings.vote_timeout_secs.and_then(|v| i32::try_from(v).ok()),
            max_queue_size: settings.max_queue_size.and_then(|v| i32::try_from(v).ok()),
            auto_disconnect_minutes: settings
                .auto_disconnect_minutes
                .and_then(|v| i32::try_from(v).ok()),
            self_vote: settings.self_vote,
            leave_empty_channel_secs: settings
                .leave_empty_channel_secs
                .and_then(|v| i32::try_from(v).ok()),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Converts back to domain settings. Values that no longer fit their type
    /// (hand-edited rows) fall back to "unset".
    pub fn into_settings(self) -> GuildSettings {
        GuildSettings {
            skip_ratio: self.skip_ratio.and_then(|v| u8::try_from(v).ok()),
            vote_timeout_secs: self.vote_timeout_secs.and_then(|v| u32::try_from(v).ok()),
            max_queue_size: self.max_queue_size.and_then(|v| u32::try_from(v).ok()),
            auto_disconnect_minutes: self
                .auto_disconnect_minutes
                .and_then(|v| u32::try_from(v).ok()),
            self_vote: self.self_vote,
            leave_empty_channel_secs: self
                .leave_empty_channel_secs
                .and_then(|v| u32::try_from(v).ok()),
        }
    }

    pub fn find_by_guild_id(
        conn: &mut SqliteConnection,
        guild_id: &str,
    ) -> QueryResult<Option<GuildSettingsRow>> {
        guild_settings::table
            .filter(guild_settings::guild_id.eq(guild_id))
            .select(GuildSettingsRow::as_select())
            .first::<GuildSettingsRow>(conn)
            .optional()
    }

    pub fn upsert(&self, conn: &mut SqliteConnection) -> QueryResult<usize> {
        diesel::insert_into(guild_settings::table)
            .values(self)
            .on_conflict(guild_settings::guild_id)
            .do_update()
            .set(self)
            .execute(conn)
    }
}
