//! Per-guild playback state machine.
//!
//! `idle -> playing <-> paused`, driven by commands, resolved votes, and the
//! started/finished/failed signals of the decode pipeline. `current` is set
//! exactly when the status is playing or paused. The owning registry wraps each
//! session in a lock, so nothing in here is synchronized.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::{PlayerError, Result},
    playback::{PlaybackBackend, StreamHandle},
    queue::{QueueSnapshot, TrackQueue},
    types::{GuildId, QueueEntry, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Track => "track",
            Self::Queue => "queue",
        })
    }
}

impl FromStr for RepeatMode {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "track" | "one" | "repeat-track" => Ok(Self::Track),
            "queue" | "all" | "repeat-queue" => Ok(Self::Queue),
            other => Err(PlayerError::Validation(format!(
                "unknown repeat mode '{other}' (expected off, track or queue)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
        })
    }
}

/// Something the notification layer may want to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    NowPlaying { guild_id: GuildId, entry: QueueEntry },
    TrackFailed { guild_id: GuildId, entry: QueueEntry, reason: String },
    QueueEnded { guild_id: GuildId },
    Paused { guild_id: GuildId },
    Resumed { guild_id: GuildId },
    Stopped { guild_id: GuildId, cleared: usize },
    QueueCleared { guild_id: GuildId, removed: usize },
}

impl SessionEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::NowPlaying { guild_id, .. }
            | Self::TrackFailed { guild_id, .. }
            | Self::QueueEnded { guild_id }
            | Self::Paused { guild_id }
            | Self::Resumed { guild_id }
            | Self::Stopped { guild_id, .. }
            | Self::QueueCleared { guild_id, .. } => *guild_id,
        }
    }
}

/// Where an enqueued entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Enqueued {
    /// The session was idle and started streaming it right away.
    NowPlaying,
    Queued(usize),
}

pub struct AudioSession {
    guild_id: GuildId,
    queue: TrackQueue,
    current: Option<QueueEntry>,
    stream: Option<StreamHandle>,
    status: PlaybackStatus,
    repeat: RepeatMode,
    last_activity: Instant,
    backend: Arc<dyn PlaybackBackend>,
    events: Vec<SessionEvent>,
}

impl fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("guild_id", &self.guild_id)
            .field("status", &self.status)
            .field("repeat", &self.repeat)
            .field("current", &self.current.as_ref().map(|entry| entry.id))
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl AudioSession {
    pub fn new(guild_id: GuildId, backend: Arc<dyn PlaybackBackend>) -> Self {
        Self {
            guild_id,
            queue: TrackQueue::new(),
            current: None,
            stream: None,
            status: PlaybackStatus::Idle,
            repeat: RepeatMode::Off,
            last_activity: Instant::now(),
            backend,
            events: Vec::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.as_ref()
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_idle(&self) -> bool {
        self.status == PlaybackStatus::Idle
    }

    /// How long the session has sat idle, or `None` while something is loaded.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.is_idle()
            .then(|| now.saturating_duration_since(self.last_activity))
    }

    /// Events produced since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Adds an entry; an idle session starts playing it immediately. A
    /// `Load` error means the backend refused it on the spot and it was dropped.
    pub fn enqueue(&mut self, entry: QueueEntry, capacity: usize) -> Result<Enqueued> {
        let id = entry.id;
        let position = self.queue.try_enqueue(entry, capacity)?;
        self.touch();
        if !self.is_idle() {
            return Ok(Enqueued::Queued(position));
        }

        self.start_next();
        if self.current.as_ref().is_some_and(|current| current.id == id) {
            return Ok(Enqueued::NowPlaying);
        }
        if let Some(position) = self.queue.iter().position(|queued| queued.id == id) {
            return Ok(Enqueued::Queued(position));
        }
        let reason = self
            .events
            .iter()
            .rev()
            .find_map(|event| match event {
                SessionEvent::TrackFailed { entry, reason, .. } if entry.id == id => {
                    Some(reason.clone())
                }
                _ => None,
            })
            .unwrap_or_default();
        Err(PlayerError::Load(reason))
    }

    /// Hands `entry` to the backend. On refusal the entry is dropped and a
    /// `TrackFailed` event recorded.
    fn play(&mut self, entry: QueueEntry) -> bool {
        match self.backend.request_play(self.guild_id, &entry) {
            Ok(handle) => {
                info!(
                    guild_id = %self.guild_id,
                    entry = entry.id.0,
                    title = %entry.metadata.title,
                    "now playing"
                );
                self.events.push(SessionEvent::NowPlaying {
                    guild_id: self.guild_id,
                    entry: entry.clone(),
                });
                self.current = Some(entry);
                self.stream = Some(handle);
                self.status = PlaybackStatus::Playing;
                self.touch();
                true
            }
            Err(e) => {
                warn!(guild_id = %self.guild_id, track = %entry.track, "track refused: {e}");
                self.events.push(SessionEvent::TrackFailed {
                    guild_id: self.guild_id,
                    entry,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Pops entries until the backend accepts one; goes idle when the queue runs dry.
    fn start_next(&mut self) {
        self.current = None;
        self.stream = None;
        while let Some(entry) = self.queue.pop_next() {
            if self.play(entry) {
                return;
            }
        }
        self.go_idle();
    }

    fn go_idle(&mut self) {
        let was_active = self.status != PlaybackStatus::Idle;
        self.status = PlaybackStatus::Idle;
        self.current = None;
        self.stream = None;
        self.touch();
        if was_active {
            self.backend.stop(self.guild_id);
            info!(guild_id = %self.guild_id, "queue ended");
            self.events.push(SessionEvent::QueueEnded {
                guild_id: self.guild_id,
            });
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Playing {
            return Err(PlayerError::StateConflict(format!(
                "cannot pause while {}",
                self.status
            )));
        }
        self.status = PlaybackStatus::Paused;
        self.backend.set_paused(self.guild_id, true);
        self.touch();
        self.events.push(SessionEvent::Paused {
            guild_id: self.guild_id,
        });
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Paused {
            return Err(PlayerError::StateConflict(format!(
                "cannot resume while {}",
                self.status
            )));
        }
        self.status = PlaybackStatus::Playing;
        self.backend.set_paused(self.guild_id, false);
        self.touch();
        self.events.push(SessionEvent::Resumed {
            guild_id: self.guild_id,
        });
        Ok(())
    }

    /// The backend confirmed the current stream is audible.
    pub fn track_started(&mut self) -> bool {
        if self.current.is_none() {
            debug!(guild_id = %self.guild_id, "ignoring start signal while idle");
            return false;
        }
        self.touch();
        debug!(guild_id = %self.guild_id, "stream started");
        true
    }

    /// Applies the repeat mode to the finished entry, then advances.
    /// Returns `false` for a stale signal (nothing was loaded).
    pub fn track_finished(&mut self) -> bool {
        let Some(finished) = self.current.take() else {
            debug!(guild_id = %self.guild_id, "ignoring finish signal while idle");
            return false;
        };
        self.stream = None;
        match self.repeat {
            RepeatMode::Track => {
                if self.play(finished) {
                    return true;
                }
            }
            RepeatMode::Queue => {
                self.queue.enqueue(finished);
            }
            RepeatMode::Off => {}
        }
        self.start_next();
        true
    }

    /// Drops the current entry without retrying it and advances.
    pub fn track_failed(&mut self, reason: &str) -> bool {
        let Some(failed) = self.current.take() else {
            debug!(guild_id = %self.guild_id, "ignoring failure signal while idle");
            return false;
        };
        warn!(guild_id = %self.guild_id, track = %failed.track, "playback failed: {reason}");
        self.events.push(SessionEvent::TrackFailed {
            guild_id: self.guild_id,
            entry: failed,
            reason: reason.to_string(),
        });
        self.start_next();
        true
    }

    /// Discards the current entry (repeat mode is not applied) and advances.
    pub fn skip(&mut self) -> Result<QueueEntry> {
        let Some(skipped) = self.current.take() else {
            return Err(PlayerError::StateConflict("nothing is playing".into()));
        };
        info!(guild_id = %self.guild_id, entry = skipped.id.0, "track skipped");
        self.start_next();
        Ok(skipped)
    }

    /// Discards the current entry, empties the queue and goes idle. Returns
    /// how many queued entries were dropped.
    pub fn stop(&mut self) -> usize {
        let cleared = self.queue.clear();
        let was_active = self.current.take().is_some();
        self.stream = None;
        self.status = PlaybackStatus::Idle;
        self.touch();
        if was_active {
            self.backend.stop(self.guild_id);
        }
        info!(guild_id = %self.guild_id, cleared, "playback stopped");
        self.events.push(SessionEvent::Stopped {
            guild_id: self.guild_id,
            cleared,
        });
        cleared
    }

    /// Empties the queue; the current entry keeps playing.
    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.clear();
        self.touch();
        info!(guild_id = %self.guild_id, removed, "queue cleared");
        self.events.push(SessionEvent::QueueCleared {
            guild_id: self.guild_id,
            removed,
        });
        removed
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        self.touch();
        info!(guild_id = %self.guild_id, mode = %mode, "repeat mode changed");
    }

    pub fn remove_at(&mut self, position: usize) -> Result<QueueEntry> {
        let removed = self.queue.remove_at(position)?;
        self.touch();
        Ok(removed)
    }

    pub fn remove_by_requester(&mut self, requester: UserId) -> Result<Vec<QueueEntry>> {
        let removed = self.queue.remove_by_requester(requester)?;
        self.touch();
        Ok(removed)
    }

    pub fn swap(&mut self, a: usize, b: usize) -> Result<()> {
        self.queue.swap(a, b)?;
        self.touch();
        Ok(())
    }

    pub fn move_to(&mut self, from: usize, to: usize) -> Result<()> {
        self.queue.move_to(from, to)?;
        self.touch();
        Ok(())
    }

    pub fn shuffle(&mut self) -> Result<()> {
        if self.queue.len() < 2 {
            return Err(PlayerError::StateConflict(
                "need at least two queued tracks to shuffle".into(),
            ));
        }
        self.queue.shuffle();
        self.touch();
        Ok(())
    }

    /// Tears the session down before it leaves the registry.
    pub fn release(&mut self) {
        self.queue.clear();
        self.current = None;
        self.stream = None;
        self.status = PlaybackStatus::Idle;
        self.backend.stop(self.guild_id);
    }
}
