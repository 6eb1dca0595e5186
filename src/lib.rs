//! Per-guild music session core: queues, playback state, quorum votes and
//! cached guild settings, behind a façade the gateway and command router call.

pub mod activity;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod metrics;
pub mod playback;
pub mod presence;
pub mod queue;
pub mod registry;
pub mod service;
pub mod session;
pub mod settings;
pub mod types;
pub mod vote;

pub use error::{PlayerError, Result};
pub use service::PlayerService;
