use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

use serde::Serialize;

use crate::vote::VoteOutcome;

/// Process counters, owned by the service and shared through an `Arc`.
#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    active_sessions: AtomicUsize,
    sessions_created: AtomicU64,
    sessions_evicted: AtomicU64,
    queued_tracks: AtomicUsize,
    votes_started: AtomicU64,
    votes_passed: AtomicU64,
    votes_failed: AtomicU64,
    votes_cancelled: AtomicU64,
    track_failures: AtomicU64,
    commands_handled: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_sub(counter: &AtomicUsize, n: usize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
        Some(x.saturating_sub(n))
    });
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            active_sessions: AtomicUsize::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            queued_tracks: AtomicUsize::new(0),
            votes_started: AtomicU64::new(0),
            votes_passed: AtomicU64::new(0),
            votes_failed: AtomicU64::new(0),
            votes_cancelled: AtomicU64::new(0),
            track_failures: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
        }
    }

    pub fn session_created(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// `queued` is what the torn down session still held.
    pub fn session_evicted(&self, queued: usize) {
        saturating_sub(&self.active_sessions, 1);
        saturating_sub(&self.queued_tracks, queued);
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Applies the change in one guild's queue length.
    pub fn queue_changed(&self, before: usize, after: usize) {
        if after > before {
            self.queued_tracks.fetch_add(after - before, Ordering::Relaxed);
        } else {
            saturating_sub(&self.queued_tracks, before - after);
        }
    }

    pub fn vote_started(&self) {
        self.votes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn vote_resolved(&self, outcome: VoteOutcome) {
        let counter = match outcome {
            VoteOutcome::Passed => &self.votes_passed,
            VoteOutcome::Failed | VoteOutcome::TimedOut => &self.votes_failed,
            VoteOutcome::Cancelled => &self.votes_cancelled,
            VoteOutcome::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn track_failed(&self) {
        self.track_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_handled(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            queued_tracks: self.queued_tracks.load(Ordering::Relaxed),
            votes_started: self.votes_started.load(Ordering::Relaxed),
            votes_passed: self.votes_passed.load(Ordering::Relaxed),
            votes_failed: self.votes_failed.load(Ordering::Relaxed),
            votes_cancelled: self.votes_cancelled.load(Ordering::Relaxed),
            track_failures: self.track_failures.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub sessions_created: u64,
    pub sessions_evicted: u64,
    pub queued_tracks: usize,
    pub votes_started: u64,
    pub votes_passed: u64,
    pub votes_failed: u64,
    pub votes_cancelled: u64,
    pub track_failures: u64,
    pub commands_handled: u64,
}
