use std::{collections::HashSet, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{GuildId, UserId};

/// Members currently in the bot's voice context, per guild. Fed by the
/// gateway's join/leave signals; votes freeze a snapshot of it at start.
///
/// A guild whose last listener left is marked alone from that moment until
/// somebody joins again.
#[derive(Debug, Default)]
pub struct VoicePresence {
    members: DashMap<GuildId, HashSet<UserId>>,
    alone_since: DashMap<GuildId, Instant>,
}

impl VoicePresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the member was already recorded.
    pub fn joined(&self, guild_id: GuildId, member: UserId) -> bool {
        let added = self.members.entry(guild_id).or_default().insert(member);
        self.alone_since.remove(&guild_id);
        debug!(guild_id = %guild_id, member = %member, added, "member joined voice");
        added
    }

    /// Returns `false` if the member was not recorded.
    pub fn left(&self, guild_id: GuildId, member: UserId) -> bool {
        let removed = self
            .members
            .get_mut(&guild_id)
            .is_some_and(|mut members| members.remove(&member));
        let emptied = self
            .members
            .remove_if(&guild_id, |_, members| members.is_empty())
            .is_some();
        if removed && emptied {
            self.alone_since.entry(guild_id).or_insert_with(Instant::now);
            debug!(guild_id = %guild_id, "voice context is now empty");
        }
        debug!(guild_id = %guild_id, member = %member, removed, "member left voice");
        removed
    }

    pub fn contains(&self, guild_id: GuildId, member: UserId) -> bool {
        self.members
            .get(&guild_id)
            .is_some_and(|members| members.contains(&member))
    }

    pub fn count(&self, guild_id: GuildId) -> usize {
        self.members.get(&guild_id).map_or(0, |members| members.len())
    }

    /// Copy of the members present right now.
    pub fn snapshot(&self, guild_id: GuildId) -> HashSet<UserId> {
        self.members
            .get(&guild_id)
            .map(|members| members.value().clone())
            .unwrap_or_default()
    }

    /// How long the guild has had nobody listening, if it is alone.
    pub fn alone_for(&self, guild_id: GuildId, now: Instant) -> Option<Duration> {
        self.alone_since
            .get(&guild_id)
            .map(|since| now.saturating_duration_since(*since))
    }

    /// Clears the alone mark without touching members (the session it guarded
    /// is gone).
    pub fn clear_alone(&self, guild_id: GuildId) {
        self.alone_since.remove(&guild_id);
    }

    /// Forgets a guild entirely (bot removed from it).
    pub fn forget(&self, guild_id: GuildId) {
        self.members.remove(&guild_id);
        self.alone_since.remove(&guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId(1);

    #[test]
    fn tracks_joins_and_leaves() {
        let presence = VoicePresence::new();
        assert!(presence.joined(GUILD, UserId(1)));
        assert!(!presence.joined(GUILD, UserId(1)));
        presence.joined(GUILD, UserId(2));
        assert_eq!(presence.count(GUILD), 2);

        assert!(presence.left(GUILD, UserId(1)));
        assert!(!presence.left(GUILD, UserId(1)));
        assert!(!presence.contains(GUILD, UserId(1)));
        assert!(presence.contains(GUILD, UserId(2)));
        assert_eq!(presence.count(GuildId(2)), 0);
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let presence = VoicePresence::new();
        presence.joined(GUILD, UserId(1));
        let frozen = presence.snapshot(GUILD);
        presence.joined(GUILD, UserId(2));
        presence.left(GUILD, UserId(1));
        assert_eq!(frozen.len(), 1);
        assert!(frozen.contains(&UserId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn last_leave_marks_the_guild_alone() {
        let presence = VoicePresence::new();
        presence.joined(GUILD, UserId(1));
        presence.joined(GUILD, UserId(2));
        presence.left(GUILD, UserId(1));
        assert!(presence.alone_for(GUILD, Instant::now()).is_none());

        presence.left(GUILD, UserId(2));
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(
            presence.alone_for(GUILD, Instant::now()),
            Some(Duration::from_secs(40))
        );
        // A stray leave does not restart the clock.
        presence.left(GUILD, UserId(2));
        assert_eq!(
            presence.alone_for(GUILD, Instant::now()),
            Some(Duration::from_secs(40))
        );

        presence.joined(GUILD, UserId(3));
        assert!(presence.alone_for(GUILD, Instant::now()).is_none());
        presence.left(GUILD, UserId(3));
        presence.forget(GUILD);
        assert!(presence.alone_for(GUILD, Instant::now()).is_none());
    }
}
