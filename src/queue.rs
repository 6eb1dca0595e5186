use std::{collections::VecDeque, time::Duration};

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::{
    error::QueueError,
    types::{QueueEntry, UserId},
};

/// Ordered pending tracks of one guild.
///
/// Positions are indices into a `VecDeque`, so they stay dense (`0..len`) after
/// every mutation. No locking here: the owning session serializes access.
#[derive(Debug, Default, Clone)]
pub struct TrackQueue {
    entries: VecDeque<QueueEntry>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Appends to the tail and returns the new entry's position.
    pub fn enqueue(&mut self, entry: QueueEntry) -> usize {
        self.entries.push_back(entry);
        self.entries.len() - 1
    }

    /// Like [`enqueue`](Self::enqueue) but refuses to grow past `capacity`.
    pub fn try_enqueue(&mut self, entry: QueueEntry, capacity: usize) -> Result<usize, QueueError> {
        if self.entries.len() >= capacity {
            return Err(QueueError::Full(capacity));
        }
        Ok(self.enqueue(entry))
    }

    pub fn remove_at(&mut self, position: usize) -> Result<QueueEntry, QueueError> {
        self.entries
            .remove(position)
            .ok_or(QueueError::NotFound(position))
    }

    /// Removes every entry requested by `requester`, keeping the others in order.
    pub fn remove_by_requester(&mut self, requester: UserId) -> Result<Vec<QueueEntry>, QueueError> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.requester == requester);
        self.entries = kept.into();
        if removed.is_empty() {
            return Err(QueueError::NoTracksFrom(requester));
        }
        Ok(removed)
    }

    fn check_pair(&self, a: usize, b: usize) -> Result<(), QueueError> {
        if a == b {
            return Err(QueueError::InvalidRange(a));
        }
        let len = self.entries.len();
        for position in [a, b] {
            if position >= len {
                return Err(QueueError::OutOfBounds { position, len });
            }
        }
        Ok(())
    }

    /// Exchanges the entries at `a` and `b`.
    pub fn swap(&mut self, a: usize, b: usize) -> Result<(), QueueError> {
        self.check_pair(a, b)?;
        self.entries.swap(a, b);
        Ok(())
    }

    /// Takes the entry at `from` out and reinserts it at `to`, shifting the rest.
    pub fn move_to(&mut self, from: usize, to: usize) -> Result<(), QueueError> {
        self.check_pair(from, to)?;
        if let Some(entry) = self.entries.remove(from) {
            self.entries.insert(to, entry);
        }
        Ok(())
    }

    /// Empties the queue, returning how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn shuffle(&mut self) {
        self.entries
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
    }

    pub fn peek_next(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn pop_next(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries
            .iter()
            .filter_map(|entry| entry.metadata.duration)
            .sum()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            entries: self.entries.iter().cloned().collect(),
        }
    }
}

/// Read-only copy of a queue, paged for display.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.entries.len().div_ceil(page_size)
    }

    /// Entries of page `index` (zero-based) paired with their queue positions.
    pub fn page(&self, index: usize, page_size: usize) -> Vec<(usize, &QueueEntry)> {
        if page_size == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .enumerate()
            .skip(index.saturating_mul(page_size))
            .take(page_size)
            .collect()
    }
}
