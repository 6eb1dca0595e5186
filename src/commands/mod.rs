//! Command table and dispatch.
//!
//! Every command is a [`CommandSpec`] in one static table. Dispatch is a
//! lookup by name or alias, a permission check, then a single match on the
//! command's [`Action`].

use std::{collections::HashMap, fmt};

use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    error::{PlayerError, Result},
    metrics::MetricsSnapshot,
    service::{EnqueueReceipt, PlayerService, QueuePage, SessionStatus},
    session::RepeatMode,
    settings::GuildSettings,
    types::{GuildId, QueueEntry, UserId},
    vote::{VoteKind, VoteProgress},
};

mod dj;
mod manager;
mod music;
pub mod pool;
mod vote;

pub use pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Music,
    Dj,
    Vote,
    Manager,
}

/// Who may run a command. Managers can do everything a DJ can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Anyone,
    Dj,
    Manager,
}

impl Permission {
    pub fn allows(self, roles: MemberRoles) -> bool {
        match self {
            Self::Anyone => true,
            Self::Dj => roles.dj || roles.manager,
            Self::Manager => roles.manager,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Anyone => "anyone",
            Self::Dj => "dj",
            Self::Manager => "manager",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Play,
    Pause,
    Resume,
    NowPlaying,
    Queue,
    Repeat,
    RemoveMine,
    Skip,
    Stop,
    ClearQueue,
    Remove,
    Move,
    Swap,
    Shuffle,
    VoteSkip,
    VoteStop,
    VoteClear,
    VoteYes,
    VoteNo,
    VoteCancel,
    ShowSettings,
    SetSetting,
    ResetSetting,
    SetSkipRatio,
    Stats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: Category,
    pub permission: Permission,
    pub action: Action,
    /// Positional arguments, for help listings.
    pub usage: &'static str,
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.usage.is_empty() {
            f.write_str(self.name)
        } else {
            write!(f, "{} {}", self.name, self.usage)
        }
    }
}

const fn spec(
    name: &'static str,
    aliases: &'static [&'static str],
    category: Category,
    permission: Permission,
    action: Action,
    usage: &'static str,
) -> CommandSpec {
    CommandSpec {
        name,
        aliases,
        category,
        permission,
        action,
        usage,
    }
}

use Category as C;
use Permission as P;

pub static COMMANDS: &[CommandSpec] = &[
    spec("play", &["p"], C::Music, P::Anyone, Action::Play, "<url> [title]"),
    spec("pause", &[], C::Music, P::Anyone, Action::Pause, ""),
    spec("resume", &["unpause"], C::Music, P::Anyone, Action::Resume, ""),
    spec("nowplaying", &["np"], C::Music, P::Anyone, Action::NowPlaying, ""),
    spec("queue", &["q"], C::Music, P::Anyone, Action::Queue, "[page]"),
    spec("repeat", &["loop"], C::Music, P::Anyone, Action::Repeat, "<off|track|queue>"),
    spec("removemine", &["rmm"], C::Music, P::Anyone, Action::RemoveMine, ""),
    spec("skip", &["fs", "forceskip"], C::Dj, P::Dj, Action::Skip, ""),
    spec("stop", &[], C::Dj, P::Dj, Action::Stop, ""),
    spec("clear", &["clearqueue"], C::Dj, P::Dj, Action::ClearQueue, ""),
    spec("remove", &["rm"], C::Dj, P::Dj, Action::Remove, "<position>"),
    spec("move", &["mv"], C::Dj, P::Dj, Action::Move, "<from> <to>"),
    spec("swap", &[], C::Dj, P::Dj, Action::Swap, "<a> <b>"),
    spec("shuffle", &[], C::Dj, P::Dj, Action::Shuffle, ""),
    spec("voteskip", &["vs"], C::Vote, P::Anyone, Action::VoteSkip, ""),
    spec("votestop", &["vst"], C::Vote, P::Anyone, Action::VoteStop, ""),
    spec("voteclear", &["vc"], C::Vote, P::Anyone, Action::VoteClear, ""),
    spec("yes", &["y"], C::Vote, P::Anyone, Action::VoteYes, "<skip|stop|clear>"),
    spec("no", &["n"], C::Vote, P::Anyone, Action::VoteNo, "<skip|stop|clear>"),
    spec("votecancel", &[], C::Vote, P::Dj, Action::VoteCancel, "<skip|stop|clear>"),
    spec("settings", &[], C::Manager, P::Manager, Action::ShowSettings, ""),
    spec("set", &[], C::Manager, P::Manager, Action::SetSetting, "<key> <value>"),
    spec("reset", &[], C::Manager, P::Manager, Action::ResetSetting, "<key>"),
    spec("skipratio", &["ratio"], C::Manager, P::Manager, Action::SetSkipRatio, "<1-100|reset>"),
    spec("stats", &[], C::Manager, P::Manager, Action::Stats, ""),
];

static LOOKUP: Lazy<HashMap<&'static str, &'static CommandSpec>> = Lazy::new(|| {
    let mut lookup = HashMap::new();
    for spec in COMMANDS {
        lookup.insert(spec.name, spec);
        for alias in spec.aliases {
            lookup.insert(*alias, spec);
        }
    }
    lookup
});

/// Resolves a command by name or alias, case-insensitively.
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    LOOKUP.get(name.trim().to_ascii_lowercase().as_str()).copied()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberRoles {
    pub dj: bool,
    pub manager: bool,
}

/// A routed user action: who, where, which command, and its positional
/// arguments, already split by the router.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub guild_id: GuildId,
    pub member: UserId,
    pub roles: MemberRoles,
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(guild_id: GuildId, member: UserId, name: impl Into<String>) -> Self {
        Self {
            guild_id,
            member,
            roles: MemberRoles::default(),
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles(mut self, roles: MemberRoles) -> Self {
        self.roles = roles;
        self
    }

    /// Parses a console line, `<guild> <member> <command> [args...]`. The
    /// caller decides what roles the line carries.
    pub fn from_line(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let mut id = |what: &str| -> Result<u64> {
            let raw = words
                .next()
                .ok_or_else(|| PlayerError::Validation(format!("missing <{what}>")))?;
            raw.parse()
                .map_err(|_| PlayerError::Validation(format!("<{what}> must be a number, got `{raw}`")))
        };
        let guild_id = GuildId(id("guild")?);
        let member = UserId(id("member")?);
        let name = words
            .next()
            .ok_or_else(|| PlayerError::Validation("missing <command>".into()))?;
        Ok(Self::new(guild_id, member, name).with_args(words))
    }

    fn arg(&self, index: usize, name: &str) -> Result<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| PlayerError::Validation(format!("missing argument <{name}>")))
    }

    /// A 1-based queue position from the user, as a 0-based index.
    fn position(&self, index: usize, name: &str) -> Result<usize> {
        let raw = self.arg(index, name)?;
        match raw.trim().parse::<usize>() {
            Ok(position) if position >= 1 => Ok(position - 1),
            _ => Err(PlayerError::Validation(format!(
                "<{name}> must be a positive number, got '{raw}'"
            ))),
        }
    }

    fn vote_kind(&self, index: usize) -> Result<VoteKind> {
        let raw = self.arg(index, "vote")?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(VoteKind::Skip),
            "stop" => Ok(VoteKind::Stop),
            "clear" | "clear-queue" | "clearqueue" => Ok(VoteKind::ClearQueue),
            other => Err(PlayerError::Validation(format!(
                "unknown vote '{other}' (expected skip, stop or clear)"
            ))),
        }
    }
}

/// Structured result of a command; rendering it is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    Enqueued(EnqueueReceipt),
    NowPlaying(SessionStatus),
    Queue(QueuePage),
    Paused,
    Resumed,
    RepeatSet { mode: RepeatMode },
    Removed { entries: Vec<QueueEntry> },
    Moved { from: usize, to: usize },
    Swapped { a: usize, b: usize },
    Shuffled,
    Skipped { entry: QueueEntry },
    Stopped { cleared: usize },
    QueueCleared { removed: usize },
    Vote(VoteProgress),
    VoteCancelled { kind: VoteKind },
    Settings(GuildSettings),
    Stats(MetricsSnapshot),
}

/// Looks the command up, checks the member may run it, and runs it.
pub async fn dispatch(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let spec = find(&invocation.name)
        .ok_or_else(|| PlayerError::UnknownCommand(invocation.name.clone()))?;
    if !spec.permission.allows(invocation.roles) {
        return Err(PlayerError::Unauthorized(spec.permission.label()));
    }
    debug!(
        guild_id = %invocation.guild_id,
        member = %invocation.member,
        command = spec.name,
        "dispatching command"
    );

    let reply = match spec.action {
        Action::Play => music::play(service, invocation).await,
        Action::Pause => music::pause(service, invocation).await,
        Action::Resume => music::resume(service, invocation).await,
        Action::NowPlaying => music::now_playing(service, invocation).await,
        Action::Queue => music::queue(service, invocation).await,
        Action::Repeat => music::repeat(service, invocation).await,
        Action::RemoveMine => music::remove_mine(service, invocation).await,
        Action::Skip => dj::skip(service, invocation).await,
        Action::Stop => dj::stop(service, invocation).await,
        Action::ClearQueue => dj::clear(service, invocation).await,
        Action::Remove => dj::remove(service, invocation).await,
        Action::Move => dj::move_entry(service, invocation).await,
        Action::Swap => dj::swap(service, invocation).await,
        Action::Shuffle => dj::shuffle(service, invocation).await,
        Action::VoteSkip => vote::start(service, invocation, VoteKind::Skip).await,
        Action::VoteStop => vote::start(service, invocation, VoteKind::Stop).await,
        Action::VoteClear => vote::start(service, invocation, VoteKind::ClearQueue).await,
        Action::VoteYes => vote::cast(service, invocation, true),
        Action::VoteNo => vote::cast(service, invocation, false),
        Action::VoteCancel => vote::cancel(service, invocation),
        Action::ShowSettings => manager::show(service, invocation).await,
        Action::SetSetting => manager::set(service, invocation).await,
        Action::ResetSetting => manager::reset(service, invocation).await,
        Action::SetSkipRatio => manager::skip_ratio(service, invocation).await,
        Action::Stats => Ok(CommandReply::Stats(service.metrics().snapshot())),
    };
    service.metrics().command_handled();
    if let Err(e) = &reply {
        warn!(
            guild_id = %invocation.guild_id,
            command = spec.name,
            code = e.code(),
            "command failed: {e}"
        );
    }
    reply
}

/// Runs commands on a bounded [`WorkerPool`].
#[derive(Clone)]
pub struct Dispatcher {
    service: PlayerService,
    pool: WorkerPool,
}

impl Dispatcher {
    pub fn new(service: PlayerService, workers: usize) -> Self {
        Self {
            service,
            pool: WorkerPool::new(workers),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn submit(&self, invocation: Invocation) -> JoinHandle<Result<CommandReply>> {
        let service = self.service.clone();
        self.pool
            .spawn(async move { dispatch(&service, &invocation).await })
    }
}
