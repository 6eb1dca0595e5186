mod common;

use std::sync::Arc;

use common::{GUILD, harness, members, url};
use guildbox::{
    PlayerService,
    commands::{CommandReply, Dispatcher, Invocation, MemberRoles, dispatch},
    config::Config,
    database::SqliteSettingsRepository,
    error::PlayerError,
    playback::LoggingBackend,
    session::{Enqueued, RepeatMode},
    types::UserId,
    vote::{VoteKind, VoteOutcome},
};

const DJ: MemberRoles = MemberRoles {
    dj: true,
    manager: false,
};
const MANAGER: MemberRoles = MemberRoles {
    dj: false,
    manager: true,
};

fn play(member: u64, n: u32) -> Invocation {
    Invocation::new(GUILD, UserId(member), "play").with_args([url(n)])
}

#[tokio::test]
async fn play_takes_the_rest_of_the_line_as_title() {
    let h = harness();
    let invocation = Invocation::new(GUILD, UserId(1), "p").with_args([
        url(1),
        "Morning".to_string(),
        "Song".to_string(),
    ]);
    let reply = dispatch(&h.service, &invocation).await.unwrap();
    let CommandReply::Enqueued(receipt) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(receipt.outcome, Enqueued::NowPlaying);

    let reply = dispatch(&h.service, &Invocation::new(GUILD, UserId(2), "NP"))
        .await
        .unwrap();
    let CommandReply::NowPlaying(status) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(status.current.unwrap().metadata.title, "Morning Song");
}

#[tokio::test]
async fn play_rejects_malformed_urls() {
    let h = harness();
    let invocation = Invocation::new(GUILD, UserId(1), "play").with_args(["not a url"]);
    assert!(matches!(
        dispatch(&h.service, &invocation).await,
        Err(PlayerError::Validation(_))
    ));
    assert!(matches!(
        dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "play")).await,
        Err(PlayerError::Validation(_))
    ));
}

#[tokio::test]
async fn privileged_commands_check_roles() {
    let h = harness();
    dispatch(&h.service, &play(1, 1)).await.unwrap();

    let skip = Invocation::new(GUILD, UserId(1), "forceskip");
    assert_eq!(
        dispatch(&h.service, &skip).await,
        Err(PlayerError::Unauthorized("dj"))
    );
    let settings = Invocation::new(GUILD, UserId(1), "settings").with_roles(DJ);
    assert_eq!(
        dispatch(&h.service, &settings).await,
        Err(PlayerError::Unauthorized("manager"))
    );

    let reply = dispatch(&h.service, &skip.with_roles(MANAGER)).await.unwrap();
    assert!(matches!(reply, CommandReply::Skipped { .. }));
}

#[tokio::test]
async fn unknown_commands_are_reported_by_name() {
    let h = harness();
    let invocation = Invocation::new(GUILD, UserId(1), "dance");
    let err = dispatch(&h.service, &invocation).await.unwrap_err();
    assert_eq!(err, PlayerError::UnknownCommand("dance".into()));
    assert_eq!(err.code(), 1);
}

#[tokio::test]
async fn queue_positions_are_one_based_for_members() {
    let h = harness();
    for n in 0..4 {
        dispatch(&h.service, &play(1, n)).await.unwrap();
    }
    let swap = Invocation::new(GUILD, UserId(1), "swap")
        .with_args(["1", "3"])
        .with_roles(DJ);
    assert_eq!(
        dispatch(&h.service, &swap).await.unwrap(),
        CommandReply::Swapped { a: 0, b: 2 }
    );

    let reply = dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "q"))
        .await
        .unwrap();
    let CommandReply::Queue(page) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    let titles: Vec<_> = page
        .entries
        .iter()
        .map(|paged| paged.entry.track.to_string())
        .collect();
    assert_eq!(titles, vec![url(3), url(2), url(1)]);

    let remove = Invocation::new(GUILD, UserId(1), "rm")
        .with_args(["0"])
        .with_roles(DJ);
    assert!(matches!(
        dispatch(&h.service, &remove).await,
        Err(PlayerError::Validation(_))
    ));
}

#[tokio::test]
async fn repeat_and_remove_mine() {
    let h = harness();
    dispatch(&h.service, &play(1, 0)).await.unwrap();
    dispatch(&h.service, &play(2, 1)).await.unwrap();
    dispatch(&h.service, &play(2, 2)).await.unwrap();
    dispatch(&h.service, &play(3, 3)).await.unwrap();

    let repeat = Invocation::new(GUILD, UserId(1), "loop").with_args(["all"]);
    assert_eq!(
        dispatch(&h.service, &repeat).await.unwrap(),
        CommandReply::RepeatSet {
            mode: RepeatMode::Queue
        }
    );

    let reply = dispatch(&h.service, &Invocation::new(GUILD, UserId(2), "rmm"))
        .await
        .unwrap();
    let CommandReply::Removed { entries } = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(entries.len(), 2);
    assert!(matches!(
        dispatch(&h.service, &Invocation::new(GUILD, UserId(2), "rmm")).await,
        Err(PlayerError::NotFound(_))
    ));
}

#[tokio::test]
async fn vote_commands_drive_a_skip_vote() {
    let h = harness();
    members(&h.service, &[1, 2, 3, 4]);
    dispatch(&h.service, &play(1, 1)).await.unwrap();

    let reply = dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "vs"))
        .await
        .unwrap();
    let CommandReply::Vote(progress) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!((progress.yes, progress.required), (1, 2));

    let cancel = Invocation::new(GUILD, UserId(2), "votecancel").with_args(["skip"]);
    assert_eq!(
        dispatch(&h.service, &cancel).await,
        Err(PlayerError::Unauthorized("dj"))
    );

    let yes = Invocation::new(GUILD, UserId(2), "yes").with_args(["Skip"]);
    let reply = dispatch(&h.service, &yes).await.unwrap();
    let CommandReply::Vote(progress) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(progress.kind, VoteKind::Skip);
    assert_eq!(progress.outcome, VoteOutcome::Passed);

    let stray = Invocation::new(GUILD, UserId(3), "no").with_args(["skip"]);
    assert_eq!(
        dispatch(&h.service, &stray).await,
        Err(PlayerError::NoActiveVote)
    );
    let bad_kind = Invocation::new(GUILD, UserId(3), "no").with_args(["dance"]);
    assert!(matches!(
        dispatch(&h.service, &bad_kind).await,
        Err(PlayerError::Validation(_))
    ));
}

#[tokio::test]
async fn dj_can_cancel_a_vote() {
    let h = harness();
    members(&h.service, &[1, 2, 3]);
    dispatch(&h.service, &play(1, 1)).await.unwrap();
    dispatch(&h.service, &play(1, 2)).await.unwrap();
    dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "vc"))
        .await
        .unwrap();

    let cancel = Invocation::new(GUILD, UserId(2), "votecancel")
        .with_args(["clear"])
        .with_roles(DJ);
    assert_eq!(
        dispatch(&h.service, &cancel).await.unwrap(),
        CommandReply::VoteCancelled {
            kind: VoteKind::ClearQueue
        }
    );
    assert_eq!(
        dispatch(&h.service, &cancel).await,
        Err(PlayerError::NoActiveVote)
    );
}

#[tokio::test]
async fn manager_commands_edit_settings() {
    let h = harness();
    let set = Invocation::new(GUILD, UserId(1), "set")
        .with_args(["vote-timeout-secs", "45"])
        .with_roles(MANAGER);
    let CommandReply::Settings(settings) = dispatch(&h.service, &set).await.unwrap() else {
        panic!("expected settings");
    };
    assert_eq!(settings.vote_timeout_secs, Some(45));

    let self_vote = Invocation::new(GUILD, UserId(1), "set")
        .with_args(["self_vote", "off"])
        .with_roles(MANAGER);
    dispatch(&h.service, &self_vote).await.unwrap();

    let too_quick = Invocation::new(GUILD, UserId(1), "set")
        .with_args(["leave-empty-channel-secs", "5"])
        .with_roles(MANAGER);
    assert!(matches!(
        dispatch(&h.service, &too_quick).await,
        Err(PlayerError::Validation(_))
    ));
    let leave = Invocation::new(GUILD, UserId(1), "set")
        .with_args(["leave_empty_channel_secs", "90"])
        .with_roles(MANAGER);
    let CommandReply::Settings(settings) = dispatch(&h.service, &leave).await.unwrap() else {
        panic!("expected settings");
    };
    assert_eq!(settings.leave_empty_channel_secs, Some(90));

    let ratio = Invocation::new(GUILD, UserId(1), "skipratio")
        .with_args(["300"])
        .with_roles(MANAGER);
    assert!(matches!(
        dispatch(&h.service, &ratio).await,
        Err(PlayerError::Validation(_))
    ));
    let ratio = Invocation::new(GUILD, UserId(1), "ratio")
        .with_args(["0"])
        .with_roles(MANAGER);
    assert!(matches!(
        dispatch(&h.service, &ratio).await,
        Err(PlayerError::Validation(_))
    ));

    let ratio = Invocation::new(GUILD, UserId(1), "ratio")
        .with_args(["70"])
        .with_roles(MANAGER);
    dispatch(&h.service, &ratio).await.unwrap();
    let reset = Invocation::new(GUILD, UserId(1), "skipratio")
        .with_args(["reset"])
        .with_roles(MANAGER);
    let CommandReply::Settings(settings) = dispatch(&h.service, &reset).await.unwrap() else {
        panic!("expected settings");
    };
    assert_eq!(settings.skip_ratio, None);
    assert_eq!(settings.self_vote, Some(false));
    assert_eq!(h.repository.stored(GUILD), Some(settings));

    let unknown = Invocation::new(GUILD, UserId(1), "reset")
        .with_args(["volume"])
        .with_roles(MANAGER);
    assert!(matches!(
        dispatch(&h.service, &unknown).await,
        Err(PlayerError::Validation(_))
    ));
}

#[tokio::test]
async fn failed_write_surfaces_and_keeps_old_value() {
    let h = harness();
    let set = |value: &str| {
        Invocation::new(GUILD, UserId(1), "set")
            .with_args(["max_queue_size", value])
            .with_roles(MANAGER)
    };
    dispatch(&h.service, &set("20")).await.unwrap();
    h.repository.fail_writes(true);
    assert!(matches!(
        dispatch(&h.service, &set("30")).await,
        Err(PlayerError::Persistence(_))
    ));
    let settings = h.service.guild_settings(GUILD).await.unwrap();
    assert_eq!(settings.max_queue_size, Some(20));
}

#[tokio::test]
async fn stats_count_handled_commands() {
    let h = harness();
    dispatch(&h.service, &play(1, 1)).await.unwrap();
    let _ = dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "pause")).await;
    let _ = dispatch(&h.service, &Invocation::new(GUILD, UserId(1), "pause")).await;

    let stats = Invocation::new(GUILD, UserId(1), "stats").with_roles(MANAGER);
    let CommandReply::Stats(snapshot) = dispatch(&h.service, &stats).await.unwrap() else {
        panic!("expected stats");
    };
    assert_eq!(snapshot.commands_handled, 3);
    assert_eq!(snapshot.active_sessions, 1);
    assert_eq!(snapshot.sessions_created, 1);
}

#[tokio::test]
async fn dispatcher_runs_submissions_on_the_pool() {
    let h = harness();
    let dispatcher = Dispatcher::new(h.service.clone(), 2);
    let handles: Vec<_> = (0..6).map(|n| dispatcher.submit(play(1, n))).collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(dispatcher.pool().available(), 2);
    // One playing, five queued, in whatever order the workers got the lock.
    assert_eq!(h.service.queue_snapshot(GUILD).await.unwrap().len(), 5);
    assert_eq!(h.backend.played().len(), 1);
}

#[tokio::test]
async fn settings_survive_a_restart_on_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let url = dir.path().join("guildbox.db").to_string_lossy().into_owned();
    let config = Config::default();

    let first = PlayerService::new(
        &config,
        Arc::new(SqliteSettingsRepository::open(&url)?),
        Arc::new(LoggingBackend::new()),
    );
    let set = Invocation::new(GUILD, UserId(1), "skipratio")
        .with_args(["65"])
        .with_roles(MANAGER);
    dispatch(&first, &set).await?;
    drop(first);

    let second = PlayerService::new(
        &config,
        Arc::new(SqliteSettingsRepository::open(&url)?),
        Arc::new(LoggingBackend::new()),
    );
    assert_eq!(second.guild_settings(GUILD).await?.skip_ratio, Some(65));
    Ok(())
}
