//! Session Identity
//!
//! Tracks who is in the room: the local peer id, every remote peer in join
//! order, the informational host flag, and the shared world origin picked by
//! the first peer to join.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::network::protocol::{WorldOrigin, NAME_KEY, WORLD_ORIGIN_KEY};
use crate::network::transport::{
    Delivery, JoinOptions, PeerId, PresenceEvent, SessionTransport, TransportError,
};

/// Whether the session is shared with other peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Joined the shared room.
    Online,
    /// Transport unavailable; running alone in a private room.
    LocalOnly,
}

/// A peer known to this session.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Peer id.
    pub id: PeerId,
    /// Published display name, once seen.
    pub display_name: Option<String>,
    /// True for ourselves.
    pub is_local: bool,
    /// Current host flag (informational only).
    pub is_session_host: bool,
    /// Order in which this session learned about the peer.
    pub join_order: u64,
}

/// Join/quit as seen by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    /// A peer became known.
    Joined(Peer),
    /// A peer left.
    Left(Peer),
}

/// Room membership for one local peer.
#[derive(Debug)]
pub struct Session {
    local: PeerId,
    mode: SessionMode,
    world_origin: WorldOrigin,
    peers: BTreeMap<PeerId, Peer>,
    next_join_order: u64,
}

impl Session {
    /// Join through `transport` and agree on the world origin.
    ///
    /// `proposed_origin` is only used if no peer has published one yet.
    pub fn join(
        transport: &mut dyn SessionTransport,
        options: &JoinOptions,
        proposed_origin: WorldOrigin,
    ) -> Result<Self, TransportError> {
        let local = transport.join(options)?;
        let world_origin = Self::resolve_origin(transport, proposed_origin)?;
        info!(peer = %local.short(), x = world_origin.x, y = world_origin.y, "joined session");
        Ok(Self {
            local,
            mode: SessionMode::Online,
            world_origin,
            peers: BTreeMap::new(),
            next_join_order: 0,
        })
    }

    /// Read the shared origin, publishing `proposed` if there is none.
    ///
    /// An existing value is never overwritten; if it cannot be read,
    /// `proposed` is used locally only. The transport has no conditional
    /// write, so two peers joining at the same instant may both publish.
    pub fn resolve_origin(
        transport: &mut dyn SessionTransport,
        proposed: WorldOrigin,
    ) -> Result<WorldOrigin, TransportError> {
        if let Some(value) = transport.room_state(WORLD_ORIGIN_KEY) {
            return Ok(match WorldOrigin::deserialize(&value) {
                Ok(origin) => origin,
                Err(err) => {
                    warn!(error = %err, %value, "unreadable world origin, using proposed origin locally");
                    proposed
                }
            });
        }
        let value = serde_json::to_value(proposed).map_err(|e| TransportError::Unavailable(e.to_string()))?;
        transport.set_room_state(WORLD_ORIGIN_KEY, value, Delivery::Reliable)?;
        debug!(x = proposed.x, y = proposed.y, "published world origin");
        Ok(proposed)
    }

    /// Same session, marked as running alone.
    pub fn into_local_only(mut self) -> Self {
        self.mode = SessionMode::LocalOnly;
        self
    }

    /// Local peer id.
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Online or local-only.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Agreed world origin.
    pub fn world_origin(&self) -> WorldOrigin {
        self.world_origin
    }

    /// Drain presence notifications and update membership.
    pub fn poll(&mut self, transport: &mut dyn SessionTransport) -> Vec<PresenceChange> {
        let mut changes = Vec::new();
        for event in transport.drain_presence() {
            match event {
                PresenceEvent::Joined(id) => {
                    if self.peers.contains_key(&id) {
                        continue;
                    }
                    let peer = Peer {
                        is_local: id == self.local,
                        is_session_host: transport.is_host(&id),
                        display_name: read_name(transport, &id),
                        join_order: self.next_join_order,
                        id: id.clone(),
                    };
                    self.next_join_order += 1;
                    info!(peer = %id.short(), local = peer.is_local, "peer joined");
                    self.peers.insert(id, peer.clone());
                    changes.push(PresenceChange::Joined(peer));
                }
                PresenceEvent::Quit(id) => {
                    if let Some(peer) = self.peers.remove(&id) {
                        info!(peer = %id.short(), "peer quit");
                        changes.push(PresenceChange::Left(peer));
                    }
                }
            }
        }

        // Host can move whenever someone leaves; names arrive after joins
        for peer in self.peers.values_mut() {
            peer.is_session_host = transport.is_host(&peer.id);
            if peer.display_name.is_none() {
                peer.display_name = read_name(transport, &peer.id);
            }
        }
        changes
    }

    /// Look up a peer.
    pub fn peer(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Number of known peers, including ourselves.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Every known peer in join order.
    pub fn peers_in_join_order(&self) -> Vec<&Peer> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| p.join_order);
        peers
    }

    /// Ids of every known peer in join order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers_in_join_order().into_iter().map(|p| p.id.clone()).collect()
    }

    /// Ids of every known remote peer, in join order.
    pub fn remote_peer_ids(&self) -> Vec<PeerId> {
        self.peers_in_join_order()
            .into_iter()
            .filter(|p| !p.is_local)
            .map(|p| p.id.clone())
            .collect()
    }
}

fn read_name(transport: &dyn SessionTransport, peer: &PeerId) -> Option<String> {
    transport
        .peer_state(peer, NAME_KEY)
        .as_ref()
        .and_then(Value::as_str)
        .map(str::to_string)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryHub;
    use serde_json::json;

    #[test]
    fn test_first_peer_picks_origin() {
        let hub = MemoryHub::new();
        let mut a = hub.connect_as("A");
        let mut b = hub.connect_as("B");

        let sa = Session::join(&mut a, &JoinOptions::default(), WorldOrigin { x: 10.0, y: 20.0 }).unwrap();
        let sb = Session::join(&mut b, &JoinOptions::default(), WorldOrigin { x: -5.0, y: 0.0 }).unwrap();
        assert_eq!(sa.world_origin(), WorldOrigin { x: 10.0, y: 20.0 });
        assert_eq!(sb.world_origin(), sa.world_origin());

        // The origin outlives the peer that picked it
        drop(sa);
        drop(a);
        let mut c = hub.connect_as("C");
        let sc = Session::join(&mut c, &JoinOptions::default(), WorldOrigin { x: 99.0, y: 99.0 }).unwrap();
        assert_eq!(sc.world_origin(), WorldOrigin { x: 10.0, y: 20.0 });
    }

    #[test]
    fn test_poll_tracks_join_order_and_host() {
        let hub = MemoryHub::new();
        let mut a = hub.connect_as("A");
        let mut b = hub.connect_as("B");
        let mut sa = Session::join(&mut a, &JoinOptions::default(), WorldOrigin { x: 0.0, y: 0.0 }).unwrap();
        let _sb = Session::join(&mut b, &JoinOptions::default(), WorldOrigin { x: 0.0, y: 0.0 }).unwrap();
        b.set_local_state(NAME_KEY, json!("Cosmic Voyager"), Delivery::Reliable).unwrap();

        let changes = sa.poll(&mut a);
        assert_eq!(changes.len(), 2);
        assert_eq!(sa.peer_ids(), vec![PeerId::from("A"), PeerId::from("B")]);
        assert_eq!(sa.remote_peer_ids(), vec![PeerId::from("B")]);

        let local = sa.peer(&PeerId::from("A")).unwrap();
        assert!(local.is_local);
        assert!(local.is_session_host);
        let remote = sa.peer(&PeerId::from("B")).unwrap();
        assert_eq!(remote.display_name.as_deref(), Some("Cosmic Voyager"));
        assert!(!remote.is_session_host);

        drop(b);
        let changes = sa.poll(&mut a);
        assert!(matches!(&changes[..], [PresenceChange::Left(peer)] if peer.id.as_str() == "B"));
        assert_eq!(sa.peer_count(), 1);
    }

    #[test]
    fn test_unreadable_origin_is_not_overwritten() {
        let hub = MemoryHub::new();
        let mut a = hub.connect_as("A");
        let _sa = Session::join(&mut a, &JoinOptions::default(), WorldOrigin { x: 1.0, y: 1.0 }).unwrap();
        a.set_room_state(WORLD_ORIGIN_KEY, json!("somewhere"), Delivery::Reliable).unwrap();

        let mut b = hub.connect_as("B");
        let sb = Session::join(&mut b, &JoinOptions::default(), WorldOrigin { x: 5.0, y: 6.0 }).unwrap();
        assert_eq!(sb.world_origin(), WorldOrigin { x: 5.0, y: 6.0 });
        assert_eq!(b.room_state(WORLD_ORIGIN_KEY), Some(json!("somewhere")));
    }

    #[test]
    fn test_join_error_propagates() {
        let hub = MemoryHub::new();
        hub.set_offline(true);
        let mut a = hub.connect();
        let result = Session::join(&mut a, &JoinOptions::default(), WorldOrigin { x: 0.0, y: 0.0 });
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }
}
