//! Process-wide map of guild sessions with lazy creation and idle eviction.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, OwnedMutexGuard},
    time::Instant,
};
use tracing::{debug, info};

use crate::{
    error::{PlayerError, Result},
    metrics::Metrics,
    playback::PlaybackBackend,
    session::AudioSession,
    types::GuildId,
    vote::VoteCoordinator,
};

/// One guild's session behind its own lock. A slot is marked torn down (under
/// that lock) before it leaves the map, so a caller that raced the eviction
/// sees the flag instead of mutating a dead session.
pub struct SessionSlot {
    guild_id: GuildId,
    torn_down: AtomicBool,
    session: Arc<Mutex<AudioSession>>,
}

impl SessionSlot {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Locks the session; `None` if it was torn down while waiting.
    pub async fn lock(&self) -> Option<OwnedMutexGuard<AudioSession>> {
        let guard = self.session.clone().lock_owned().await;
        (!self.is_torn_down()).then_some(guard)
    }
}

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<SessionSlot>>,
    backend: Arc<dyn PlaybackBackend>,
    votes: VoteCoordinator,
    metrics: Arc<Metrics>,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn PlaybackBackend>,
        votes: VoteCoordinator,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            backend,
            votes,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|slot| *slot.key()).collect()
    }

    /// Returns the guild's slot, creating it on first use. The session is
    /// fully built before it becomes visible in the map.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<SessionSlot> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                info!(guild_id = %guild_id, "session created");
                self.metrics.session_created();
                Arc::new(SessionSlot {
                    guild_id,
                    torn_down: AtomicBool::new(false),
                    session: Arc::new(Mutex::new(AudioSession::new(
                        guild_id,
                        self.backend.clone(),
                    ))),
                })
            })
            .value()
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<SessionSlot>> {
        self.sessions.get(&guild_id).map(|slot| slot.value().clone())
    }

    /// Locks the guild's session, creating one if needed. Retries when it
    /// loses a race with eviction.
    pub async fn lock_or_create(&self, guild_id: GuildId) -> OwnedMutexGuard<AudioSession> {
        loop {
            let slot = self.get_or_create(guild_id);
            if let Some(guard) = slot.lock().await {
                return guard;
            }
            debug!(guild_id = %guild_id, "session torn down while waiting, recreating");
        }
    }

    /// Locks an existing session.
    pub async fn lock(&self, guild_id: GuildId) -> Result<OwnedMutexGuard<AudioSession>> {
        let slot = self.get(guild_id).ok_or(PlayerError::NoSession(guild_id))?;
        slot.lock().await.ok_or(PlayerError::NoSession(guild_id))
    }

    /// Marks, cancels, releases and unlinks. Caller holds the session lock.
    fn tear_down(&self, slot: &Arc<SessionSlot>, session: &mut AudioSession, reason: &str) {
        slot.torn_down.store(true, Ordering::Release);
        let cancelled = self.votes.cancel_all(slot.guild_id);
        let queued = session.queue().len();
        session.release();
        self.sessions
            .remove_if(&slot.guild_id, |_, current| Arc::ptr_eq(current, slot));
        self.metrics.session_evicted(queued);
        info!(guild_id = %slot.guild_id, cancelled, reason, "session removed");
    }

    /// Evicts the session if it has been idle for at least `threshold` and has
    /// no vote in flight.
    pub async fn evict_if_idle(&self, guild_id: GuildId, threshold: Duration) -> bool {
        let Some(slot) = self.get(guild_id) else {
            return false;
        };
        let Some(mut session) = slot.lock().await else {
            return false;
        };
        let Some(idle) = session.idle_for(Instant::now()) else {
            return false;
        };
        if idle < threshold || self.votes.has_pending(guild_id) {
            return false;
        }
        self.tear_down(&slot, &mut session, "idle");
        true
    }

    /// Explicit teardown (e.g. the bot left the guild), whatever the session state.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        self.evict(guild_id, "removed").await
    }

    /// Tears the session down now, playing or not, logging `reason`.
    pub async fn evict(&self, guild_id: GuildId, reason: &str) -> bool {
        let Some(slot) = self.get(guild_id) else {
            return false;
        };
        let Some(mut session) = slot.lock().await else {
            return false;
        };
        self.tear_down(&slot, &mut session, reason);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        playback::LoggingBackend,
        types::{QueueEntry, TrackMetadata, TrackRef, UserId},
        vote::{VoteKind, VoteRequest},
    };

    const GUILD: GuildId = GuildId(5);
    const IDLE: Duration = Duration::from_secs(60);

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(
            Arc::new(LoggingBackend::new()),
            VoteCoordinator::new(),
            Arc::new(Metrics::new()),
        ))
    }

    fn entry() -> QueueEntry {
        let track = TrackRef::parse("https://example.com/a.mp3").unwrap();
        let metadata = TrackMetadata::unresolved(&track);
        QueueEntry::new(UserId(1), track, metadata)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let registry = registry();
        let a = registry.get_or_create(GUILD);
        let b = registry.get_or_create(GUILD);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(GuildId(6)).is_none());
        assert_eq!(
            registry.lock(GuildId(6)).await.err(),
            Some(PlayerError::NoSession(GuildId(6)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_evicted_after_threshold() {
        let registry = registry();
        registry.get_or_create(GUILD);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!registry.evict_if_idle(GUILD, IDLE).await);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.evict_if_idle(GUILD, IDLE).await);
        assert!(registry.get(GUILD).is_none());
        assert_eq!(registry.metrics.snapshot().active_sessions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn playing_session_is_kept() {
        let registry = registry();
        registry.lock_or_create(GUILD).await.enqueue(entry(), 10).unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(!registry.evict_if_idle(GUILD, IDLE).await);
        assert!(registry.get(GUILD).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_vote_blocks_eviction() {
        let registry = registry();
        registry.get_or_create(GUILD);
        registry
            .votes
            .start(
                VoteRequest {
                    guild_id: GUILD,
                    kind: VoteKind::Stop,
                    initiator: UserId(1),
                    eligible: [UserId(1), UserId(2), UserId(3)].into_iter().collect(),
                    ratio_percent: 100,
                    timeout: Duration::from_secs(600),
                    initiator_votes_yes: true,
                },
                Box::new(|_| {}),
            )
            .unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!registry.evict_if_idle(GUILD, IDLE).await);
    }

    #[tokio::test]
    async fn remove_cancels_votes_and_marks_slot() {
        let registry = registry();
        let slot = registry.get_or_create(GUILD);
        registry
            .votes
            .start(
                VoteRequest {
                    guild_id: GUILD,
                    kind: VoteKind::Skip,
                    initiator: UserId(1),
                    eligible: [UserId(1), UserId(2)].into_iter().collect(),
                    ratio_percent: 100,
                    timeout: Duration::from_secs(30),
                    initiator_votes_yes: true,
                },
                Box::new(|_| {}),
            )
            .unwrap();

        assert!(registry.remove(GUILD).await);
        assert!(slot.is_torn_down());
        assert!(slot.lock().await.is_none());
        assert!(!registry.votes.has_pending(GUILD));
        assert!(!registry.remove(GUILD).await);

        let fresh = registry.get_or_create(GUILD);
        assert!(!Arc::ptr_eq(&slot, &fresh));
    }

    #[tokio::test]
    async fn evict_tears_down_a_playing_session() {
        let registry = registry();
        registry.lock_or_create(GUILD).await.enqueue(entry(), 10).unwrap();
        assert!(registry.evict(GUILD, "empty channel").await);
        assert!(registry.get(GUILD).is_none());
        assert!(!registry.evict(GUILD, "empty channel").await);
    }
}
