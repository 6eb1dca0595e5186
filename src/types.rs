use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PlayerError;

/// Discord guild (tenant) identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl From<u64> for GuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-unique id of a queued entry, so two enqueues of the same URL stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

impl EntryId {
    pub fn next() -> Self {
        Self(NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reference to something the decode pipeline can stream. Only http(s) URLs are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    url: String,
}

impl TrackRef {
    pub fn parse(raw: &str) -> Result<Self, PlayerError> {
        let parsed = Url::parse(raw.trim())
            .map_err(|e| PlayerError::Validation(format!("invalid track url '{raw}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Self {
                url: parsed.to_string(),
            }),
            other => Err(PlayerError::Validation(format!(
                "unsupported url scheme '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub duration: Option<Duration>,
    pub source_url: String,
    pub thumbnail_url: Option<String>,
}

impl TrackMetadata {
    /// Metadata for a track whose details were not resolved upstream.
    pub fn unresolved(track: &TrackRef) -> Self {
        Self {
            title: track.as_str().to_string(),
            duration: None,
            source_url: track.as_str().to_string(),
            thumbnail_url: None,
        }
    }
}

/// A track waiting in (or taken from) a guild queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub requester: UserId,
    pub track: TrackRef,
    pub metadata: TrackMetadata,
}

impl QueueEntry {
    pub fn new(requester: UserId, track: TrackRef, metadata: TrackMetadata) -> Self {
        Self {
            id: EntryId::next(),
            requester,
            track,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(TrackRef::parse("https://example.com/a.mp3").is_ok());
        assert!(TrackRef::parse("  http://example.com/b  ").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(matches!(
            TrackRef::parse("file:///etc/passwd"),
            Err(PlayerError::Validation(_))
        ));
        assert!(matches!(
            TrackRef::parse("not a url"),
            Err(PlayerError::Validation(_))
        ));
    }

    #[test]
    fn entries_for_the_same_track_get_distinct_ids() {
        let track = TrackRef::parse("https://example.com/a.mp3").unwrap();
        let a = QueueEntry::new(UserId(1), track.clone(), TrackMetadata::unresolved(&track));
        let b = QueueEntry::new(UserId(1), track.clone(), TrackMetadata::unresolved(&track));
        assert_ne!(a.id, b.id);
    }
}
