//! Session Transport Contract
//!
//! The sync layer never talks to a networking SDK directly. Everything it
//! needs is this trait: join a room, learn who joined or quit, read any
//! peer's published key/value state, and write the local peer's own keys.
//!
//! Two delivery qualities exist:
//! - [`Delivery::Unreliable`]: last value wins, may be dropped or superseded.
//! - [`Delivery::Reliable`]: eventually visible to every peer at least once,
//!   with no ordering relative to other keys.
//!
//! Reads are non-blocking lookups against the transport's local cache.

use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Unique peer identifier, stable for the lifetime of a session.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create from any string-like id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Delivery quality for a state write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Last value wins, no delivery guarantee.
    Unreliable,
    /// Guaranteed to become visible to every peer eventually.
    Reliable,
}

/// Join/quit notification, drained once per frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A peer (possibly the local one) is now in the room.
    Joined(PeerId),
    /// A peer left the room.
    Quit(PeerId),
}

/// Options passed to [`SessionTransport::join`].
#[derive(Clone, Debug)]
pub struct JoinOptions {
    /// Maximum peers allowed in the room.
    pub max_peers: usize,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self { max_peers: 8 }
    }
}

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Room already holds the maximum number of peers.
    #[error("room is full ({max} peers)")]
    RoomFull {
        /// Configured room size.
        max: usize,
    },
    /// Operation requires a joined session.
    #[error("not joined to a session")]
    NotJoined,
    /// Join called twice, or the requested id is taken.
    #[error("peer {0} already joined")]
    AlreadyJoined(PeerId),
    /// Transport backend could not be reached.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// The narrow session transport interface consumed by every sync component.
pub trait SessionTransport {
    /// Join the shared room and return the local peer id.
    fn join(&mut self, options: &JoinOptions) -> Result<PeerId, TransportError>;

    /// Leave the room. Other peers receive a quit notification.
    fn leave(&mut self);

    /// Local peer id, once joined.
    fn local_peer(&self) -> Option<&PeerId>;

    /// Take every join/quit notification received since the last call.
    fn drain_presence(&mut self) -> Vec<PresenceEvent>;

    /// Whether `peer` is the current session host (informational only).
    fn is_host(&self, peer: &PeerId) -> bool;

    /// Read a key published by `peer`.
    fn peer_state(&self, peer: &PeerId, key: &str) -> Option<Value>;

    /// Publish a key under the local peer.
    fn set_local_state(
        &mut self,
        key: &str,
        value: Value,
        delivery: Delivery,
    ) -> Result<(), TransportError>;

    /// Read a room-wide key.
    fn room_state(&self, key: &str) -> Option<Value>;

    /// Publish a room-wide key.
    fn set_room_state(
        &mut self,
        key: &str,
        value: Value,
        delivery: Delivery,
    ) -> Result<(), TransportError>;
}
