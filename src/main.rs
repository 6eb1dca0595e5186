use std::sync::Arc;

use anyhow::Result;
use guildbox::{
    PlayerService,
    activity::{ActivityRotator, LoggingPresenceSink},
    commands::{COMMANDS, Dispatcher, Invocation, MemberRoles},
    config::Config,
    database::SqliteSettingsRepository,
    playback::LoggingBackend,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let repository = Arc::new(SqliteSettingsRepository::open(&config.database_url)?);
    // The gateway and decode pipeline attach here; headless runs only log.
    let service = PlayerService::new(&config, repository, Arc::new(LoggingBackend::new()));
    let dispatcher = Dispatcher::new(service.clone(), config.workers);

    let mut tasks = vec![service.spawn_sweeper(config.sweep_interval)];
    if config.activity.enabled {
        let rotator = ActivityRotator::from_config(&config.activity)?;
        if let Some(handle) = rotator.spawn(Arc::new(LoggingPresenceSink)) {
            tasks.push(handle);
        }
    }

    let mut events = service.subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(guild_id = %event.guild_id(), "session event {json}"),
                    Err(e) => error!("failed to encode session event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    }));

    // Headless router: operator commands from stdin, one per line.
    let console = dispatcher;
    let workers = console.pool().size();
    tasks.push(tokio::spawn(async move {
        let operator = MemberRoles {
            dj: true,
            manager: true,
        };
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let invocation = match Invocation::from_line(&line) {
                Ok(invocation) => invocation.with_roles(operator),
                Err(e) => {
                    warn!("usage: <guild> <member> <command> [args...]: {e}");
                    continue;
                }
            };
            let reply = console.submit(invocation);
            tokio::spawn(async move {
                match reply.await {
                    Ok(Ok(reply)) => match serde_json::to_string(&reply) {
                        Ok(json) => info!("reply {json}"),
                        Err(e) => error!("failed to encode reply: {e}"),
                    },
                    Ok(Err(e)) => warn!(code = e.code(), "command refused: {e}"),
                    Err(e) => error!("command task failed: {e}"),
                }
            });
        }
    }));

    info!(
        commands = COMMANDS.len(),
        workers,
        prefix = %config.activity.command_prefix,
        "guildbox ready"
    );
    info!(
        "Tunables: GUILDBOX_DEFAULT_SKIP_RATIO, GUILDBOX_VOTE_TIMEOUT_SECS, GUILDBOX_INACTIVITY_SECS, GUILDBOX_LEAVE_EMPTY_CHANNEL_SECS, GUILDBOX_MAX_QUEUE_SIZE, GUILDBOX_WORKERS, DATABASE_URL"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for task in tasks {
        task.abort();
    }
    Ok(())
}
