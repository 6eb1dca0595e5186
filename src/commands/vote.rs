use super::{CommandReply, Invocation};
use crate::{
    error::Result,
    service::PlayerService,
    vote::{Ballot, VoteKind},
};

pub(super) async fn start(
    service: &PlayerService,
    invocation: &Invocation,
    kind: VoteKind,
) -> Result<CommandReply> {
    let (guild_id, member) = (invocation.guild_id, invocation.member);
    let progress = match kind {
        VoteKind::Skip => service.request_vote_skip(guild_id, member).await?,
        VoteKind::Stop => service.request_vote_stop(guild_id, member).await?,
        VoteKind::ClearQueue => service.request_vote_clear(guild_id, member).await?,
    };
    Ok(CommandReply::Vote(progress))
}

pub(super) fn cast(service: &PlayerService, invocation: &Invocation, yes: bool) -> Result<CommandReply> {
    let kind = invocation.vote_kind(0)?;
    let ballot = if yes { Ballot::Yes } else { Ballot::No };
    let progress = service.request_cast_vote(invocation.guild_id, kind, invocation.member, ballot)?;
    Ok(CommandReply::Vote(progress))
}

pub(super) fn cancel(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let kind = invocation.vote_kind(0)?;
    service.request_cancel_vote(invocation.guild_id, kind)?;
    Ok(CommandReply::VoteCancelled { kind })
}
