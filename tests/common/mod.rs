#![allow(dead_code)]

use std::{collections::HashSet, sync::Arc, time::Duration};

use guildbox::{
    PlayerService,
    config::Config,
    database::MemorySettingsRepository,
    error::{PlayerError, Result},
    playback::{PlaybackBackend, StreamHandle},
    session::SessionEvent,
    types::{GuildId, QueueEntry, TrackRef, UserId},
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

pub const GUILD: GuildId = GuildId(1001);

/// Accepts every track except the ones told to refuse, and remembers what it saw.
#[derive(Default)]
pub struct RecordingBackend {
    played: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    stops: Mutex<usize>,
}

impl RecordingBackend {
    pub fn refuse(&self, url: &str) {
        self.refused.lock().insert(url.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn stops(&self) -> usize {
        *self.stops.lock()
    }
}

impl PlaybackBackend for RecordingBackend {
    fn request_play(&self, _: GuildId, entry: &QueueEntry) -> Result<StreamHandle> {
        if self.refused.lock().contains(entry.track.as_str()) {
            return Err(PlayerError::Load("unsupported container".into()));
        }
        let mut played = self.played.lock();
        played.push(entry.track.to_string());
        Ok(StreamHandle(played.len() as u64))
    }

    fn set_paused(&self, _: GuildId, _: bool) {}

    fn stop(&self, _: GuildId) {
        *self.stops.lock() += 1;
    }
}

pub struct Harness {
    pub service: PlayerService,
    pub backend: Arc<RecordingBackend>,
    pub repository: Arc<MemorySettingsRepository>,
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let backend = Arc::new(RecordingBackend::default());
    let repository = Arc::new(MemorySettingsRepository::new());
    let service = PlayerService::new(&config, repository.clone(), backend.clone());
    Harness {
        service,
        backend,
        repository,
    }
}

pub fn url(n: u32) -> String {
    format!("https://media.example.org/track-{n}.ogg")
}

pub fn track(n: u32) -> TrackRef {
    TrackRef::parse(&url(n)).unwrap()
}

pub fn members(service: &PlayerService, ids: &[u64]) -> Vec<UserId> {
    ids.iter()
        .map(|id| {
            let member = UserId(*id);
            service.member_joined_voice_context(GUILD, member);
            member
        })
        .collect()
}

/// Waits (bounded) for the first event matching `pred`.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream broke: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
