//! Roster Aggregator
//!
//! Reads each peer's reliable `name`, `score` and `alive` fields and derives
//! the leaderboard. Pure read: never writes to the transport.

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::network::protocol::{ALIVE_KEY, NAME_KEY, SCORE_KEY};
use crate::network::transport::{PeerId, SessionTransport};

/// Name shown for peers that have not published one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// A peer's published roster fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterFields {
    /// Display name.
    pub name: String,
    /// Score.
    pub score: u64,
    /// Whether the peer's ship is alive.
    pub alive: bool,
}

impl Default for RosterFields {
    fn default() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            score: 0,
            alive: true,
        }
    }
}

impl RosterFields {
    /// Read `peer`'s fields, defaulting anything missing or mistyped.
    pub fn read(transport: &dyn SessionTransport, peer: &PeerId) -> Self {
        let defaults = Self::default();
        Self {
            name: transport
                .peer_state(peer, NAME_KEY)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or(defaults.name),
            score: transport
                .peer_state(peer, SCORE_KEY)
                .as_ref()
                .and_then(Value::as_u64)
                .unwrap_or(defaults.score),
            alive: transport
                .peer_state(peer, ALIVE_KEY)
                .as_ref()
                .and_then(Value::as_bool)
                .unwrap_or(defaults.alive),
        }
    }
}

/// One leaderboard line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// Peer id.
    pub peer_id: PeerId,
    /// Display name.
    pub name: String,
    /// Score.
    pub score: u64,
    /// Whether the peer's ship is alive.
    pub alive: bool,
    /// True for the local peer.
    pub is_local: bool,
}

/// Derives the leaderboard from roster fields.
#[derive(Debug, Default)]
pub struct RosterAggregator {
    rows: Vec<LeaderboardRow>,
}

impl RosterAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `peers`, given in join order. Sorted by score
    /// descending; equal scores keep join order.
    pub fn rebuild(&mut self, transport: &dyn SessionTransport, peers: &[PeerId], local: &PeerId) -> &[LeaderboardRow] {
        let mut rows: Vec<LeaderboardRow> = peers
            .iter()
            .map(|peer| {
                let fields = RosterFields::read(transport, peer);
                LeaderboardRow {
                    peer_id: peer.clone(),
                    name: fields.name,
                    score: fields.score,
                    alive: fields.alive,
                    is_local: peer == local,
                }
            })
            .collect();
        // Stable sort keeps join order among ties
        rows.sort_by(|a, b| b.score.cmp(&a.score));
        self.rows = rows;
        &self.rows
    }

    /// Last rebuilt leaderboard.
    pub fn rows(&self) -> &[LeaderboardRow] {
        &self.rows
    }
}

// =============================================================================
// TESTS
// =============================================================================
