//! Entry points used by the command layer and the gateway.
//!
//! Settings are always resolved before a session lock is taken, so a slow
//! repository never holds up a guild's queue. Session events are published on
//! a broadcast channel for whoever renders them.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{
    config::Config,
    database::SettingsRepository,
    error::{PlayerError, Result},
    metrics::Metrics,
    playback::PlaybackBackend,
    presence::VoicePresence,
    queue::QueueSnapshot,
    registry::SessionRegistry,
    session::{AudioSession, Enqueued, PlaybackStatus, RepeatMode, SessionEvent},
    settings::{EffectiveSettings, GuildSettings, SettingKey, SettingValue, SettingsCache},
    types::{EntryId, GuildId, QueueEntry, TrackMetadata, TrackRef, UserId},
    vote::{
        Ballot, OnResolved, VoteCoordinator, VoteKind, VoteProgress, VoteRequest, VoteResolution,
    },
};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnqueueReceipt {
    pub entry_id: EntryId,
    pub outcome: Enqueued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PagedEntry {
    pub position: usize,
    pub entry: QueueEntry,
}

/// One fixed-size page of a guild's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuePage {
    pub index: usize,
    pub page_count: usize,
    pub total: usize,
    pub total_duration_secs: u64,
    pub entries: Vec<PagedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub status: PlaybackStatus,
    pub repeat: RepeatMode,
    pub current: Option<QueueEntry>,
    pub queued: usize,
}

#[derive(Clone)]
pub struct PlayerService {
    registry: Arc<SessionRegistry>,
    votes: VoteCoordinator,
    settings: Arc<SettingsCache>,
    presence: Arc<VoicePresence>,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<SessionEvent>,
    page_size: usize,
}

impl PlayerService {
    pub fn new(
        config: &Config,
        repository: Arc<dyn SettingsRepository>,
        backend: Arc<dyn PlaybackBackend>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let votes = VoteCoordinator::with_metrics(metrics.clone());
        let registry = Arc::new(SessionRegistry::new(backend, votes.clone(), metrics.clone()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            votes,
            settings: Arc::new(SettingsCache::new(repository, config.defaults)),
            presence: Arc::new(VoicePresence::new()),
            metrics,
            events,
            page_size: config.page_size.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }

    pub fn presence(&self) -> &Arc<VoicePresence> {
        &self.presence
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Runs `f` against the locked session and publishes what it produced.
    /// Votes the change made moot are cancelled before the lock is released.
    fn apply<T>(
        &self,
        session: &mut AudioSession,
        f: impl FnOnce(&mut AudioSession) -> Result<T>,
    ) -> Result<T> {
        let before = session.queue().len();
        let current_before = session.current().map(|entry| entry.id);
        let result = f(session);
        self.metrics.queue_changed(before, session.queue().len());
        self.cancel_moot_votes(session, current_before);
        for event in session.take_events() {
            if matches!(event, SessionEvent::TrackFailed { .. }) {
                self.metrics.track_failed();
            }
            // Nobody listening is fine.
            let _ = self.events.send(event);
        }
        result
    }

    fn cancel_moot_votes(&self, session: &AudioSession, current_before: Option<EntryId>) {
        let guild_id = session.guild_id();
        let current = session.current().map(|entry| entry.id);
        if current_before.is_some() && current != current_before {
            self.votes.cancel(guild_id, VoteKind::Skip);
        }
        if session.queue().is_empty() {
            self.votes.cancel(guild_id, VoteKind::ClearQueue);
            if session.is_idle() {
                self.votes.cancel(guild_id, VoteKind::Stop);
            }
        }
    }

    async fn with_session<T>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut AudioSession) -> Result<T>,
    ) -> Result<T> {
        let mut session = self.registry.lock(guild_id).await?;
        self.apply(&mut session, f)
    }

    // Gateway signals.

    pub fn member_joined_voice_context(&self, guild_id: GuildId, member: UserId) {
        self.presence.joined(guild_id, member);
    }

    /// Pending votes keep the eligible set they started with.
    pub fn member_left_voice_context(&self, guild_id: GuildId, member: UserId) {
        self.presence.left(guild_id, member);
    }

    pub async fn track_started(&self, guild_id: GuildId) -> Result<bool> {
        self.with_session(guild_id, |session| Ok(session.track_started()))
            .await
    }

    pub async fn track_finished(&self, guild_id: GuildId) -> Result<bool> {
        self.with_session(guild_id, |session| Ok(session.track_finished()))
            .await
    }

    pub async fn track_failed(&self, guild_id: GuildId, reason: &str) -> Result<bool> {
        self.with_session(guild_id, |session| Ok(session.track_failed(reason)))
            .await
    }

    /// Bot removed from the guild: drop its session, presence and cached settings.
    pub async fn remove_guild(&self, guild_id: GuildId) -> bool {
        let removed = self.registry.remove(guild_id).await;
        self.presence.forget(guild_id);
        self.settings.invalidate(guild_id);
        removed
    }

    // Playback.

    pub async fn request_enqueue(
        &self,
        guild_id: GuildId,
        requester: UserId,
        track: TrackRef,
        metadata: Option<TrackMetadata>,
    ) -> Result<EnqueueReceipt> {
        let effective = self.settings.effective(guild_id).await?;
        let metadata = metadata.unwrap_or_else(|| TrackMetadata::unresolved(&track));
        let entry = QueueEntry::new(requester, track, metadata);
        let entry_id = entry.id;

        let mut session = self.registry.lock_or_create(guild_id).await;
        let outcome = self.apply(&mut session, |session| {
            session.enqueue(entry, effective.max_queue_size)
        })?;
        debug!(guild_id = %guild_id, requester = %requester, entry = entry_id.0, ?outcome, "track enqueued");
        Ok(EnqueueReceipt { entry_id, outcome })
    }

    /// Skips without a vote (for members allowed to bypass voting).
    pub async fn request_privileged_skip(&self, guild_id: GuildId) -> Result<QueueEntry> {
        self.with_session(guild_id, AudioSession::skip).await
    }

    /// Stops playback and clears the queue without a vote.
    pub async fn request_stop(&self, guild_id: GuildId) -> Result<usize> {
        self.with_session(guild_id, |session| Ok(session.stop()))
            .await
    }

    pub async fn request_clear_queue(&self, guild_id: GuildId) -> Result<usize> {
        self.with_session(guild_id, |session| Ok(session.clear_queue()))
            .await
    }

    pub async fn request_pause(&self, guild_id: GuildId) -> Result<()> {
        self.with_session(guild_id, AudioSession::pause).await
    }

    pub async fn request_resume(&self, guild_id: GuildId) -> Result<()> {
        self.with_session(guild_id, AudioSession::resume).await
    }

    pub async fn request_set_repeat(&self, guild_id: GuildId, mode: RepeatMode) -> Result<()> {
        self.with_session(guild_id, |session| {
            session.set_repeat_mode(mode);
            Ok(())
        })
        .await
    }

    pub async fn request_remove(&self, guild_id: GuildId, position: usize) -> Result<QueueEntry> {
        self.with_session(guild_id, |session| session.remove_at(position))
            .await
    }

    pub async fn request_remove_by_requester(
        &self,
        guild_id: GuildId,
        requester: UserId,
    ) -> Result<Vec<QueueEntry>> {
        self.with_session(guild_id, |session| session.remove_by_requester(requester))
            .await
    }

    pub async fn request_swap(&self, guild_id: GuildId, a: usize, b: usize) -> Result<()> {
        self.with_session(guild_id, |session| session.swap(a, b))
            .await
    }

    pub async fn request_move(&self, guild_id: GuildId, from: usize, to: usize) -> Result<()> {
        self.with_session(guild_id, |session| session.move_to(from, to))
            .await
    }

    pub async fn request_shuffle(&self, guild_id: GuildId) -> Result<()> {
        self.with_session(guild_id, AudioSession::shuffle).await
    }

    // Read-only views.

    pub async fn queue_snapshot(&self, guild_id: GuildId) -> Result<QueueSnapshot> {
        let session = self.registry.lock(guild_id).await?;
        Ok(session.snapshot())
    }

    /// Page `index` (zero-based) of the queue, `page_size` entries per page.
    pub async fn queue_page(&self, guild_id: GuildId, index: usize) -> Result<QueuePage> {
        let (snapshot, total_duration) = {
            let session = self.registry.lock(guild_id).await?;
            (session.snapshot(), session.queue().total_duration())
        };
        let page_count = snapshot.page_count(self.page_size);
        if index > 0 && index >= page_count {
            return Err(PlayerError::NotFound(format!(
                "page {} (queue has {} page(s))",
                index + 1,
                page_count
            )));
        }
        let entries = snapshot
            .page(index, self.page_size)
            .into_iter()
            .map(|(position, entry)| PagedEntry {
                position,
                entry: entry.clone(),
            })
            .collect();
        Ok(QueuePage {
            index,
            page_count,
            total: snapshot.len(),
            total_duration_secs: total_duration.as_secs(),
            entries,
        })
    }

    pub async fn session_status(&self, guild_id: GuildId) -> Result<SessionStatus> {
        let session = self.registry.lock(guild_id).await?;
        Ok(SessionStatus {
            status: session.status(),
            repeat: session.repeat_mode(),
            current: session.current().cloned(),
            queued: session.queue().len(),
        })
    }

    // Voting.

    pub async fn request_vote_skip(&self, guild_id: GuildId, requester: UserId) -> Result<VoteProgress> {
        self.start_vote(guild_id, VoteKind::Skip, requester).await
    }

    pub async fn request_vote_stop(&self, guild_id: GuildId, requester: UserId) -> Result<VoteProgress> {
        self.start_vote(guild_id, VoteKind::Stop, requester).await
    }

    pub async fn request_vote_clear(&self, guild_id: GuildId, requester: UserId) -> Result<VoteProgress> {
        self.start_vote(guild_id, VoteKind::ClearQueue, requester).await
    }

    pub fn request_cast_vote(
        &self,
        guild_id: GuildId,
        kind: VoteKind,
        voter: UserId,
        ballot: Ballot,
    ) -> Result<VoteProgress> {
        self.votes.cast(guild_id, kind, voter, ballot)
    }

    pub fn request_cancel_vote(&self, guild_id: GuildId, kind: VoteKind) -> Result<()> {
        if self.votes.cancel(guild_id, kind) {
            Ok(())
        } else {
            Err(PlayerError::NoActiveVote)
        }
    }

    pub fn vote_progress(&self, guild_id: GuildId, kind: VoteKind) -> Option<VoteProgress> {
        self.votes.progress(guild_id, kind)
    }

    async fn start_vote(
        &self,
        guild_id: GuildId,
        kind: VoteKind,
        initiator: UserId,
    ) -> Result<VoteProgress> {
        let effective = self.settings.effective(guild_id).await?;

        // Checked under the lock, but the lock is not held while the vote runs.
        let target = {
            let session = self.registry.lock(guild_id).await?;
            match kind {
                VoteKind::Skip => match session.current() {
                    Some(current) => Some(current.id),
                    None => return Err(PlayerError::StateConflict("nothing is playing".into())),
                },
                VoteKind::Stop if session.is_idle() && session.queue().is_empty() => {
                    return Err(PlayerError::StateConflict("nothing to stop".into()));
                }
                VoteKind::ClearQueue if session.queue().is_empty() => {
                    return Err(PlayerError::StateConflict("the queue is already empty".into()));
                }
                _ => None,
            }
        };

        let request = vote_request(guild_id, kind, initiator, &effective, self.presence.snapshot(guild_id));
        self.votes.start(request, self.on_vote_resolved(target))
    }

    fn on_vote_resolved(&self, target: Option<EntryId>) -> OnResolved {
        let service = self.clone();
        Box::new(move |resolution: VoteResolution| {
            if resolution.progress.outcome.passed() {
                tokio::spawn(async move { service.apply_vote(resolution, target).await });
            }
        })
    }

    async fn apply_vote(&self, resolution: VoteResolution, target: Option<EntryId>) {
        let guild_id = resolution.guild_id;
        let kind = resolution.progress.kind;
        let Ok(mut session) = self.registry.lock(guild_id).await else {
            debug!(guild_id = %guild_id, kind = %kind, "session gone before vote action");
            return;
        };
        let result = self.apply(&mut session, |session| match kind {
            VoteKind::Skip => {
                let still_current = session
                    .current()
                    .is_some_and(|current| Some(current.id) == target);
                if !still_current {
                    return Err(PlayerError::StateConflict("track already changed".into()));
                }
                session.skip().map(|_| ())
            }
            VoteKind::Stop => {
                session.stop();
                Ok(())
            }
            VoteKind::ClearQueue => {
                session.clear_queue();
                Ok(())
            }
        });
        match result {
            Ok(()) => info!(guild_id = %guild_id, kind = %kind, "vote action applied"),
            Err(e) => info!(guild_id = %guild_id, kind = %kind, "vote action dropped: {e}"),
        }
    }

    // Settings.

    pub async fn request_set_skip_ratio(
        &self,
        guild_id: GuildId,
        ratio: Option<u8>,
    ) -> Result<GuildSettings> {
        self.request_set_setting(
            guild_id,
            SettingKey::SkipRatio,
            ratio.map(|r| SettingValue::Number(r.into())),
        )
        .await
    }

    pub async fn request_set_setting(
        &self,
        guild_id: GuildId,
        key: SettingKey,
        value: Option<SettingValue>,
    ) -> Result<GuildSettings> {
        self.settings.set(guild_id, key, value).await
    }

    pub async fn guild_settings(&self, guild_id: GuildId) -> Result<GuildSettings> {
        self.settings.snapshot(guild_id).await
    }

    // Background work.

    /// One pass over every live session. A guild whose voice context has been
    /// empty past its `leave_empty_channel` window is torn down even while
    /// playing; any other session goes once it has idled past its inactivity
    /// window. Windows come from cached settings only, so the pass never waits
    /// on the repository. Returns how many sessions were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for guild_id in self.registry.guild_ids() {
            let windows = self.cached_effective(guild_id);
            let abandoned = self
                .presence
                .alone_for(guild_id, now)
                .is_some_and(|alone| alone >= windows.leave_empty_channel);
            let gone = if abandoned {
                let evicted = self.registry.evict(guild_id, "voice context empty").await;
                self.presence.clear_alone(guild_id);
                evicted
            } else {
                self.registry.evict_if_idle(guild_id, windows.inactivity).await
            };
            if gone {
                removed += 1;
            }
        }
        removed
    }

    fn cached_effective(&self, guild_id: GuildId) -> EffectiveSettings {
        let cached = self.settings.cached(guild_id).unwrap_or_default();
        EffectiveSettings::resolve(&cached, self.settings.defaults())
    }

    /// Runs [`sweep`](Self::sweep) every `period` until the handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let service = self.clone();
        info!(period_secs = period.as_secs(), "session sweeper started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = service.sweep().await;
                if removed > 0 {
                    debug!(removed, live = service.registry.len(), "sweep finished");
                }
            }
        })
    }
}

fn vote_request(
    guild_id: GuildId,
    kind: VoteKind,
    initiator: UserId,
    effective: &EffectiveSettings,
    eligible: std::collections::HashSet<UserId>,
) -> VoteRequest {
    VoteRequest {
        guild_id,
        kind,
        initiator,
        eligible,
        ratio_percent: effective.skip_ratio,
        timeout: effective.vote_timeout,
        initiator_votes_yes: effective.self_vote,
    }
}
