use super::{CommandReply, Invocation};
use crate::{
    error::Result,
    service::PlayerService,
    session::RepeatMode,
    types::{TrackMetadata, TrackRef},
};

/// `play <url> [title...]`. Anything after the URL is taken as the title the
/// router already resolved.
pub(super) async fn play(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let track = TrackRef::parse(invocation.arg(0, "url")?)?;
    let metadata = (invocation.args.len() > 1).then(|| TrackMetadata {
        title: invocation.args[1..].join(" "),
        duration: None,
        source_url: track.as_str().to_string(),
        thumbnail_url: None,
    });
    let receipt = service
        .request_enqueue(invocation.guild_id, invocation.member, track, metadata)
        .await?;
    Ok(CommandReply::Enqueued(receipt))
}

pub(super) async fn pause(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    service.request_pause(invocation.guild_id).await?;
    Ok(CommandReply::Paused)
}

pub(super) async fn resume(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    service.request_resume(invocation.guild_id).await?;
    Ok(CommandReply::Resumed)
}

pub(super) async fn now_playing(
    service: &PlayerService,
    invocation: &Invocation,
) -> Result<CommandReply> {
    let status = service.session_status(invocation.guild_id).await?;
    Ok(CommandReply::NowPlaying(status))
}

/// `queue [page]`, pages counted from 1.
pub(super) async fn queue(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let index = match invocation.args.first() {
        Some(_) => invocation.position(0, "page")?,
        None => 0,
    };
    let page = service.queue_page(invocation.guild_id, index).await?;
    Ok(CommandReply::Queue(page))
}

pub(super) async fn repeat(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let mode: RepeatMode = invocation.arg(0, "mode")?.parse()?;
    service.request_set_repeat(invocation.guild_id, mode).await?;
    Ok(CommandReply::RepeatSet { mode })
}

/// Removes every queued track the invoking member requested.
pub(super) async fn remove_mine(
    service: &PlayerService,
    invocation: &Invocation,
) -> Result<CommandReply> {
    let entries = service
        .request_remove_by_requester(invocation.guild_id, invocation.member)
        .await?;
    Ok(CommandReply::Removed { entries })
}
