//! Rotating bot status line.

use std::{fs, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{commands::COMMANDS, config::ActivityConfig};

/// Receives each status as it comes up (the gateway's presence update).
pub trait PresenceSink: Send + Sync {
    fn set_activity(&self, status: &str);
}

/// Sink for headless runs.
#[derive(Debug, Default)]
pub struct LoggingPresenceSink;

impl PresenceSink for LoggingPresenceSink {
    fn set_activity(&self, status: &str) {
        info!(status, "activity changed");
    }
}

#[derive(Debug, Clone)]
pub struct ActivityRotator {
    statuses: Vec<String>,
    interval: Duration,
}

impl ActivityRotator {
    pub fn new(statuses: Vec<String>, interval: Duration) -> Self {
        Self { statuses, interval }
    }

    /// Builds the status list: lines of the optional file first, then
    /// `prefix + name` for every command, shuffled once if asked.
    pub fn from_config(config: &ActivityConfig) -> Result<Self> {
        let mut statuses = Vec::new();
        if let Some(path) = &config.file {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read activity file {}", path.display()))?;
            statuses.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }
        if config.include_commands {
            statuses.extend(
                COMMANDS
                    .iter()
                    .map(|spec| format!("{}{}", config.command_prefix, spec.name)),
            );
        }
        if config.randomized {
            statuses.shuffle(&mut rand::thread_rng());
        }
        Ok(Self::new(statuses, config.interval))
    }

    pub fn statuses(&self) -> &[String] {
        &self.statuses
    }

    /// Pushes the next status every interval, wrapping around. Returns `None`
    /// (and starts nothing) when there is nothing to show.
    pub fn spawn(self, sink: Arc<dyn PresenceSink>) -> Option<JoinHandle<()>> {
        if self.statuses.is_empty() {
            return None;
        }
        info!(
            count = self.statuses.len(),
            interval_secs = self.interval.as_secs(),
            "activity rotator started"
        );
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            let mut position = 0;
            loop {
                interval.tick().await;
                sink.set_activity(&self.statuses[position]);
                position = (position + 1) % self.statuses.len();
            }
        }))
    }
}
