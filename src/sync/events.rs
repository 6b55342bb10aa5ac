//! Sync Events
//!
//! Typed notifications published by a [`SyncPeer`](super::peer::SyncPeer)
//! for game code (HUD, sound, scoreboards). Delivered over a
//! `tokio::sync::broadcast` channel; a subscriber that falls behind loses the
//! oldest events, never blocks the frame loop.

use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;

use crate::network::transport::PeerId;
use crate::sync::entity::{EntityId, EntityKind};
use crate::sync::roster::LeaderboardRow;

/// Capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a shadow disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// No longer present in its owner's snapshot.
    Absent,
    /// Its owner published it as dead.
    Terminal,
    /// Its owner left the session.
    OwnerQuit,
    /// A kill event named it.
    Killed,
}

/// Something game code may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A peer joined (including the local one).
    PlayerJoined {
        /// Peer id.
        peer: PeerId,
        /// True for ourselves.
        is_local: bool,
    },
    /// A remote peer quit; its shadows are already gone.
    PlayerLeft {
        /// Peer id.
        peer: PeerId,
        /// Shadows purged.
        purged: usize,
    },
    /// A shadow was destroyed.
    ShadowRemoved {
        /// Entity id.
        id: EntityId,
        /// Entity kind.
        kind: EntityKind,
        /// Remote owner.
        owner: PeerId,
        /// Removal path.
        reason: RemovalReason,
    },
    /// One of our own entities was killed by another peer.
    OwnedDestroyed {
        /// Entity id.
        id: EntityId,
        /// Entity kind.
        kind: EntityKind,
        /// Peer that decided the kill.
        by: PeerId,
    },
    /// The leaderboard was rebuilt.
    LeaderboardUpdated(Vec<LeaderboardRow>),
}

/// Sender side of the event stream.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
