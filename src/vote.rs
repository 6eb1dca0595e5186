//! Quorum voting for disruptive actions (skip, stop, clear).
//!
//! One vote per (guild, kind) at a time. A vote passes the moment the yes-count
//! reaches the threshold, fails as soon as the remaining ballots cannot get it
//! there, and otherwise times out at its deadline. Whatever the terminal state,
//! the outcome callback runs exactly once.

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};

use crate::{
    error::{PlayerError, Result},
    metrics::Metrics,
    types::{GuildId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Skip,
    Stop,
    ClearQueue,
}

impl VoteKind {
    pub const ALL: [VoteKind; 3] = [VoteKind::Skip, VoteKind::Stop, VoteKind::ClearQueue];
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Stop => "stop",
            Self::ClearQueue => "clear-queue",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ballot {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Pending,
    Passed,
    Failed,
    TimedOut,
    Cancelled,
}

impl VoteOutcome {
    pub fn is_pending(self) -> bool {
        self == Self::Pending
    }

    pub fn passed(self) -> bool {
        self == Self::Passed
    }
}

/// Tally of a vote at some point in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteProgress {
    pub kind: VoteKind,
    pub yes: usize,
    pub no: usize,
    pub eligible: usize,
    pub required: usize,
    pub outcome: VoteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteResolution {
    pub guild_id: GuildId,
    pub initiator: UserId,
    pub progress: VoteProgress,
}

/// Invoked once when a vote reaches a terminal state. Runs on the thread that
/// resolved the vote, so it must not block.
pub type OnResolved = Box<dyn FnOnce(VoteResolution) + Send + 'static>;

pub struct VoteRequest {
    pub guild_id: GuildId,
    pub kind: VoteKind,
    pub initiator: UserId,
    pub eligible: HashSet<UserId>,
    pub ratio_percent: u8,
    pub timeout: Duration,
    /// Count the initiator's vote as yes when the vote opens.
    pub initiator_votes_yes: bool,
}

/// Yes-votes needed: `ceil(eligible * ratio / 100)`, at least one.
pub fn required_votes(eligible: usize, ratio_percent: u8) -> usize {
    (eligible * usize::from(ratio_percent))
        .div_ceil(100)
        .max(1)
}

struct VoteSession {
    guild_id: GuildId,
    kind: VoteKind,
    initiator: UserId,
    eligible: HashSet<UserId>,
    yes: HashSet<UserId>,
    no: HashSet<UserId>,
    required: usize,
    deadline: Instant,
    outcome: VoteOutcome,
    on_resolved: Option<OnResolved>,
    timer: Option<JoinHandle<()>>,
}

impl VoteSession {
    fn progress(&self) -> VoteProgress {
        VoteProgress {
            kind: self.kind,
            yes: self.yes.len(),
            no: self.no.len(),
            eligible: self.eligible.len(),
            required: self.required,
            outcome: self.outcome,
        }
    }

    /// Outcome implied by the current tally, ignoring the deadline.
    fn evaluate(&self) -> VoteOutcome {
        let yes = self.yes.len();
        let uncast = self.eligible.len() - yes - self.no.len();
        if yes >= self.required {
            VoteOutcome::Passed
        } else if yes + uncast < self.required {
            VoteOutcome::Failed
        } else {
            VoteOutcome::Pending
        }
    }

    /// Moves a pending vote to `outcome` and hands back the callback to run.
    /// Returns `None` if the vote had already been resolved.
    fn settle(&mut self, outcome: VoteOutcome, abort_timer: bool) -> Option<(OnResolved, VoteResolution)> {
        if !self.outcome.is_pending() || outcome.is_pending() {
            return None;
        }
        self.outcome = outcome;
        if let Some(timer) = self.timer.take()
            && abort_timer
        {
            timer.abort();
        }
        let resolution = VoteResolution {
            guild_id: self.guild_id,
            initiator: self.initiator,
            progress: self.progress(),
        };
        // Release the voter sets; only the tally survives in the resolution.
        self.eligible.clear();
        self.yes.clear();
        self.no.clear();
        self.on_resolved.take().map(|callback| (callback, resolution))
    }
}

type VoteKey = (GuildId, VoteKind);
type VoteSlot = Arc<Mutex<VoteSession>>;

/// Per-(guild, kind) vote state, shared by every request handler.
#[derive(Clone, Default)]
pub struct VoteCoordinator {
    votes: Arc<DashMap<VoteKey, VoteSlot>>,
    metrics: Option<Arc<Metrics>>,
}

impl VoteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every start and resolution in `metrics`.
    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            votes: Arc::default(),
            metrics: Some(metrics),
        }
    }

    /// Opens a vote. Must be called from within a tokio runtime (the deadline
    /// timer is a spawned task).
    pub fn start(&self, request: VoteRequest, on_resolved: OnResolved) -> Result<VoteProgress> {
        if !(1..=100).contains(&request.ratio_percent) {
            return Err(PlayerError::Validation(format!(
                "vote ratio {} is outside 1-100",
                request.ratio_percent
            )));
        }
        if !request.eligible.contains(&request.initiator) {
            return Err(PlayerError::NotEligible);
        }

        let key = (request.guild_id, request.kind);
        let mut session = VoteSession {
            guild_id: request.guild_id,
            kind: request.kind,
            initiator: request.initiator,
            required: required_votes(request.eligible.len(), request.ratio_percent),
            eligible: request.eligible,
            yes: HashSet::new(),
            no: HashSet::new(),
            deadline: Instant::now() + request.timeout,
            outcome: VoteOutcome::Pending,
            on_resolved: Some(on_resolved),
            timer: None,
        };
        if request.initiator_votes_yes {
            session.yes.insert(request.initiator);
        }

        let slot = match self.votes.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().lock().outcome.is_pending() {
                    return Err(PlayerError::StateConflict(format!(
                        "a {} vote is already in progress",
                        request.kind
                    )));
                }
                // Resolved but not yet unlinked; take its place.
                let slot = Arc::new(Mutex::new(session));
                occupied.insert(slot.clone());
                slot
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Mutex::new(session));
                vacant.insert(slot.clone());
                slot
            }
        };

        info!(
            guild_id = %key.0,
            kind = %key.1,
            initiator = %request.initiator,
            timeout_secs = request.timeout.as_secs(),
            "vote started"
        );
        if let Some(metrics) = &self.metrics {
            metrics.vote_started();
        }

        // The self-vote alone may already decide it (e.g. a single listener).
        let immediate = {
            let mut session = slot.lock();
            let outcome = session.evaluate();
            session.settle(outcome, false)
        };
        if let Some(fired) = immediate {
            let progress = fired.1.progress;
            self.fire(key, &slot, Some(fired));
            return Ok(progress);
        }

        let timer = {
            let coordinator = self.clone();
            let slot = slot.clone();
            let timeout = request.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let fired = slot.lock().settle(VoteOutcome::TimedOut, false);
                coordinator.fire(key, &slot, fired);
            })
        };

        let mut session = slot.lock();
        if session.outcome.is_pending() {
            session.timer = Some(timer);
        } else {
            timer.abort();
        }
        Ok(session.progress())
    }

    /// Records a ballot and resolves the vote early if the result is decided.
    pub fn cast(
        &self,
        guild_id: GuildId,
        kind: VoteKind,
        voter: UserId,
        ballot: Ballot,
    ) -> Result<VoteProgress> {
        let key = (guild_id, kind);
        let slot = self
            .votes
            .get(&key)
            .map(|slot| slot.value().clone())
            .ok_or(PlayerError::NoActiveVote)?;

        let (progress, fired) = {
            let mut session = slot.lock();
            if !session.outcome.is_pending() {
                return Err(PlayerError::NoActiveVote);
            }
            if Instant::now() >= session.deadline {
                let fired = session.settle(VoteOutcome::TimedOut, true);
                drop(session);
                self.fire(key, &slot, fired);
                return Err(PlayerError::NoActiveVote);
            }
            if !session.eligible.contains(&voter) {
                return Err(PlayerError::NotEligible);
            }
            if session.yes.contains(&voter) || session.no.contains(&voter) {
                return Err(PlayerError::AlreadyVoted);
            }
            match ballot {
                Ballot::Yes => session.yes.insert(voter),
                Ballot::No => session.no.insert(voter),
            };
            let outcome = session.evaluate();
            let fired = session.settle(outcome, true);
            let progress = match &fired {
                Some((_, resolution)) => resolution.progress,
                None => session.progress(),
            };
            (progress, fired)
        };
        debug!(guild_id = %guild_id, kind = %kind, voter = %voter, ?ballot, yes = progress.yes, "ballot cast");
        self.fire(key, &slot, fired);
        Ok(progress)
    }

    /// Cancels a pending vote. Returns whether there was one.
    pub fn cancel(&self, guild_id: GuildId, kind: VoteKind) -> bool {
        let key = (guild_id, kind);
        let Some(slot) = self.votes.get(&key).map(|slot| slot.value().clone()) else {
            return false;
        };
        let fired = slot.lock().settle(VoteOutcome::Cancelled, true);
        let cancelled = fired.is_some();
        self.fire(key, &slot, fired);
        cancelled
    }

    /// Cancels every pending vote of a guild; returns how many were cancelled.
    pub fn cancel_all(&self, guild_id: GuildId) -> usize {
        VoteKind::ALL
            .into_iter()
            .filter(|kind| self.cancel(guild_id, *kind))
            .count()
    }

    pub fn progress(&self, guild_id: GuildId, kind: VoteKind) -> Option<VoteProgress> {
        let slot = self.votes.get(&(guild_id, kind))?.value().clone();
        let progress = slot.lock().progress();
        progress.outcome.is_pending().then_some(progress)
    }

    pub fn has_pending(&self, guild_id: GuildId) -> bool {
        VoteKind::ALL
            .into_iter()
            .any(|kind| self.progress(guild_id, kind).is_some())
    }

    fn fire(&self, key: VoteKey, slot: &VoteSlot, fired: Option<(OnResolved, VoteResolution)>) {
        if let Some((callback, resolution)) = fired {
            self.unlink(key, slot);
            log_resolution(&resolution);
            if let Some(metrics) = &self.metrics {
                metrics.vote_resolved(resolution.progress.outcome);
            }
            callback(resolution);
        }
    }

    fn unlink(&self, key: VoteKey, slot: &VoteSlot) {
        self.votes
            .remove_if(&key, |_, current| Arc::ptr_eq(current, slot));
    }
}

fn log_resolution(resolution: &VoteResolution) {
    let progress = &resolution.progress;
    info!(
        guild_id = %resolution.guild_id,
        kind = %progress.kind,
        outcome = ?progress.outcome,
        yes = progress.yes,
        no = progress.no,
        required = progress.required,
        eligible = progress.eligible,
        "vote resolved"
    );
}
