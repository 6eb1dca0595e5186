use super::{CommandReply, Invocation};
use crate::{error::Result, service::PlayerService};

pub(super) async fn skip(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let entry = service.request_privileged_skip(invocation.guild_id).await?;
    Ok(CommandReply::Skipped { entry })
}

pub(super) async fn stop(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let cleared = service.request_stop(invocation.guild_id).await?;
    Ok(CommandReply::Stopped { cleared })
}

pub(super) async fn clear(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let removed = service.request_clear_queue(invocation.guild_id).await?;
    Ok(CommandReply::QueueCleared { removed })
}

pub(super) async fn remove(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let position = invocation.position(0, "position")?;
    let entry = service.request_remove(invocation.guild_id, position).await?;
    Ok(CommandReply::Removed {
        entries: vec![entry],
    })
}

pub(super) async fn move_entry(
    service: &PlayerService,
    invocation: &Invocation,
) -> Result<CommandReply> {
    let from = invocation.position(0, "from")?;
    let to = invocation.position(1, "to")?;
    service.request_move(invocation.guild_id, from, to).await?;
    Ok(CommandReply::Moved { from, to })
}

pub(super) async fn swap(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let a = invocation.position(0, "a")?;
    let b = invocation.position(1, "b")?;
    service.request_swap(invocation.guild_id, a, b).await?;
    Ok(CommandReply::Swapped { a, b })
}

pub(super) async fn shuffle(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    service.request_shuffle(invocation.guild_id).await?;
    Ok(CommandReply::Shuffled)
}
