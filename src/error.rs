//! Error kinds returned by the player core.
//!
//! Every failure is scoped to one guild or one request; nothing here is fatal
//! to the process. The command layer maps these to user-facing text.

use thiserror::Error;

use crate::types::GuildId;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// Out-of-range or malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Action not valid for the current playback or vote state.
    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("member is not eligible to vote")]
    NotEligible,

    #[error("member has already voted")]
    AlreadyVoted,

    #[error("no vote in progress")]
    NoActiveVote,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no session for guild {0}")]
    NoSession(GuildId),

    /// The decode pipeline refused or failed to load a track.
    #[error("failed to load track: {0}")]
    Load(String),

    /// The settings repository rejected a write; the cache was left untouched.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("missing permission: {0}")]
    Unauthorized(&'static str),

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl PlayerError {
    /// Stable numeric code for each kind, used to build tracker references.
    pub fn code(&self) -> u16 {
        match self {
            Self::UnknownCommand(_) => 1,
            Self::Validation(_) => 3,
            Self::Unauthorized(_) => 4,
            Self::StateConflict(_) => 104,
            Self::NotFound(_) => 106,
            Self::NoSession(_) => 101,
            Self::Load(_) => 107,
            Self::NotEligible => 103,
            Self::AlreadyVoted => 120,
            Self::NoActiveVote => 121,
            Self::Persistence(_) => 300,
        }
    }
}

/// Errors from positional queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Both positions are the same.
    #[error("positions {0} and {0} are the same")]
    InvalidRange(usize),

    #[error("position {position} is outside the queue (length {len})")]
    OutOfBounds { position: usize, len: usize },

    #[error("nothing queued at position {0}")]
    NotFound(usize),

    #[error("member {0} has no tracks in the queue")]
    NoTracksFrom(crate::types::UserId),

    #[error("queue is full ({0} tracks)")]
    Full(usize),
}

impl From<QueueError> for PlayerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidRange(_) | QueueError::Full(_) => {
                PlayerError::Validation(err.to_string())
            }
            QueueError::OutOfBounds { .. } | QueueError::NotFound(_) | QueueError::NoTracksFrom(_) => {
                PlayerError::NotFound(err.to_string())
            }
        }
    }
}
