//! Seam to the decode pipeline and voice transport.
//!
//! The player never decodes audio itself. It hands a track to a
//! [`PlaybackBackend`] and learns how it went later through the
//! started/finished/failed signals.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

use crate::{
    error::Result,
    types::{GuildId, QueueEntry},
};

/// Opaque handle of a stream the backend accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StreamHandle(pub u64);

/// Must not block: calls are made while a guild's session lock is held.
pub trait PlaybackBackend: Send + Sync {
    /// Queues `entry` for streaming in the guild's voice context. An `Err`
    /// (normally [`PlayerError::Load`](crate::error::PlayerError::Load)) means
    /// the track was refused outright.
    fn request_play(&self, guild_id: GuildId, entry: &QueueEntry) -> Result<StreamHandle>;

    fn set_paused(&self, guild_id: GuildId, paused: bool);

    /// Releases whatever stream the guild has.
    fn stop(&self, guild_id: GuildId);
}

/// Backend for headless runs: accepts every track and only logs.
#[derive(Debug, Default)]
pub struct LoggingBackend {
    next_handle: AtomicU64,
}

impl LoggingBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackBackend for LoggingBackend {
    fn request_play(&self, guild_id: GuildId, entry: &QueueEntry) -> Result<StreamHandle> {
        let handle = StreamHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        info!(
            guild_id = %guild_id,
            track = %entry.track,
            handle = handle.0,
            "play requested"
        );
        Ok(handle)
    }

    fn set_paused(&self, guild_id: GuildId, paused: bool) {
        info!(guild_id = %guild_id, paused, "pause state changed");
    }

    fn stop(&self, guild_id: GuildId) {
        info!(guild_id = %guild_id, "stream released");
    }
}
