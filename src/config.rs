//! Sync Configuration
//!
//! Cadences, smoothing and window sizes for the sync layer. Defaults are the
//! tuned values for a 60 Hz simulation; every field can be overridden through
//! `COMET_SYNC_*` environment variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Simulation frame rate the defaults are tuned for (Hz).
pub const SIMULATION_RATE: u32 = 60;

/// Configuration for one sync peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Frames between snapshot broadcasts (12 frames = 200 ms at 60 Hz).
    pub broadcast_interval_frames: u32,
    /// Frames between leaderboard rebuilds (90 frames = 1.5 s at 60 Hz).
    pub leaderboard_interval_frames: u32,
    /// Exponential smoothing factor applied to shadow entities each frame.
    pub smoothing_alpha: f32,
    /// Discrete events kept in each published ring.
    pub event_window: usize,
    /// Processed event keys remembered by the deduplicator.
    pub dedup_window: usize,
    /// Killed shadow ids remembered to block resurrection by stale snapshots.
    pub tombstone_window: usize,
    /// Maximum peers in one room.
    pub max_peers: usize,
    /// Fixed display name instead of a generated one.
    pub display_name: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_frames: 12,
            leaderboard_interval_frames: 90,
            smoothing_alpha: 0.15,
            event_window: 20,
            dedup_window: 256,
            tombstone_window: 128,
            max_peers: 8,
            display_name: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// A cadence was zero.
    #[error("{0} must be at least 1 frame")]
    ZeroInterval(&'static str),
    /// Smoothing factor outside (0, 1].
    #[error("smoothing alpha must be in (0, 1], got {0}")]
    InvalidAlpha(f32),
    /// A window size was zero.
    #[error("{0} must hold at least one entry")]
    EmptyWindow(&'static str),
}

impl SyncConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            broadcast_interval_frames: parse_or(
                &lookup,
                "COMET_SYNC_BROADCAST_FRAMES",
                defaults.broadcast_interval_frames,
            )?,
            leaderboard_interval_frames: parse_or(
                &lookup,
                "COMET_SYNC_LEADERBOARD_FRAMES",
                defaults.leaderboard_interval_frames,
            )?,
            smoothing_alpha: parse_or(&lookup, "COMET_SYNC_SMOOTHING_ALPHA", defaults.smoothing_alpha)?,
            event_window: parse_or(&lookup, "COMET_SYNC_EVENT_WINDOW", defaults.event_window)?,
            dedup_window: parse_or(&lookup, "COMET_SYNC_DEDUP_WINDOW", defaults.dedup_window)?,
            tombstone_window: parse_or(
                &lookup,
                "COMET_SYNC_TOMBSTONE_WINDOW",
                defaults.tombstone_window,
            )?,
            max_peers: parse_or(&lookup, "COMET_SYNC_MAX_PEERS", defaults.max_peers)?,
            display_name: lookup("COMET_SYNC_DISPLAY_NAME").filter(|name| !name.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the sync loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_interval_frames == 0 {
            return Err(ConfigError::ZeroInterval("broadcast_interval_frames"));
        }
        if self.leaderboard_interval_frames == 0 {
            return Err(ConfigError::ZeroInterval("leaderboard_interval_frames"));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ConfigError::InvalidAlpha(self.smoothing_alpha));
        }
        if self.event_window == 0 {
            return Err(ConfigError::EmptyWindow("event_window"));
        }
        if self.dedup_window == 0 {
            return Err(ConfigError::EmptyWindow("dedup_window"));
        }
        if self.tombstone_window == 0 {
            return Err(ConfigError::EmptyWindow("tombstone_window"));
        }
        if self.max_peers == 0 {
            return Err(ConfigError::EmptyWindow("max_peers"));
        }
        Ok(())
    }

    /// Broadcast interval in milliseconds at the nominal simulation rate.
    pub fn broadcast_interval_ms(&self) -> u32 {
        self.broadcast_interval_frames * 1000 / SIMULATION_RATE
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

// =============================================================================
// TESTS
// =============================================================================
