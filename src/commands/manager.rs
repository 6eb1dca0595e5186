use super::{CommandReply, Invocation};
use crate::{
    error::{PlayerError, Result},
    service::PlayerService,
    settings::{SettingKey, SettingValue},
};

pub(super) async fn show(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let settings = service.guild_settings(invocation.guild_id).await?;
    Ok(CommandReply::Settings(settings))
}

/// `set <key> <value>`
pub(super) async fn set(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let key: SettingKey = invocation.arg(0, "key")?.parse()?;
    let value = SettingValue::parse_for(key, invocation.arg(1, "value")?)?;
    let settings = service
        .request_set_setting(invocation.guild_id, key, Some(value))
        .await?;
    Ok(CommandReply::Settings(settings))
}

/// `reset <key>`
pub(super) async fn reset(service: &PlayerService, invocation: &Invocation) -> Result<CommandReply> {
    let key: SettingKey = invocation.arg(0, "key")?.parse()?;
    let settings = service
        .request_set_setting(invocation.guild_id, key, None)
        .await?;
    Ok(CommandReply::Settings(settings))
}

/// `skipratio <1-100|reset>`
pub(super) async fn skip_ratio(
    service: &PlayerService,
    invocation: &Invocation,
) -> Result<CommandReply> {
    let raw = invocation.arg(0, "ratio")?.trim();
    let ratio = if raw.eq_ignore_ascii_case("reset") {
        None
    } else {
        // Out-of-range numbers are left to the settings validation.
        let ratio = raw.parse::<u32>().map_err(|_| {
            PlayerError::Validation(format!("skip ratio must be a number, got '{raw}'"))
        })?;
        Some(u8::try_from(ratio).map_err(|_| {
            PlayerError::Validation(format!("skip_ratio must be between 1 and 100, got {ratio}"))
        })?)
    };
    let settings = service
        .request_set_skip_ratio(invocation.guild_id, ratio)
        .await?;
    Ok(CommandReply::Settings(settings))
}
