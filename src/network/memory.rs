//! In-Process Transport
//!
//! A [`MemoryHub`] is one shared room living in process memory. Each
//! [`MemoryTransport`] connected to it behaves like a peer's SDK handle:
//! writes are visible to every other handle immediately, join/quit
//! notifications are queued per peer and drained once per frame.
//!
//! Used by tests, by the demo binary, and as the private single-peer room
//! behind local-only mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use super::transport::{
    Delivery, JoinOptions, PeerId, PresenceEvent, SessionTransport, TransportError,
};

#[derive(Default)]
struct HubInner {
    /// Peers in join order; the first one is host.
    peers: Vec<PeerId>,
    peer_state: HashMap<PeerId, HashMap<String, Value>>,
    room_state: HashMap<String, Value>,
    inboxes: HashMap<PeerId, Vec<PresenceEvent>>,
    /// Discard unreliable writes (simulated packet loss).
    drop_unreliable: bool,
    /// Refuse joins (simulated backend outage).
    offline: bool,
    unreliable_dropped: u64,
}

/// A shared in-memory room.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    /// Create an empty room.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a handle that joins under a fresh UUID.
    pub fn connect(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            requested_id: None,
            local: None,
        }
    }

    /// Create a handle that joins under a chosen id.
    pub fn connect_as(&self, id: impl Into<PeerId>) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            requested_id: Some(id.into()),
            local: None,
        }
    }

    /// Peers currently in the room, in join order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.lock().peers.clone()
    }

    /// Simulate loss of every unreliable write while `lossy` is set.
    pub fn set_unreliable_loss(&self, lossy: bool) {
        self.lock().drop_unreliable = lossy;
    }

    /// Number of unreliable writes discarded so far.
    pub fn unreliable_dropped(&self) -> u64 {
        self.lock().unreliable_dropped
    }

    /// Simulate the backend being unreachable for new joins.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Remove a peer and notify everyone else, as the SDK does on disconnect.
    pub fn disconnect(&self, peer: &PeerId) {
        let mut inner = self.lock();
        let Some(pos) = inner.peers.iter().position(|p| p == peer) else {
            return;
        };
        inner.peers.remove(pos);
        inner.peer_state.remove(peer);
        inner.inboxes.remove(peer);
        for inbox in inner.inboxes.values_mut() {
            inbox.push(PresenceEvent::Quit(peer.clone()));
        }
        info!(peer = %peer.short(), "peer disconnected from room");
    }
}

/// One peer's handle onto a [`MemoryHub`].
pub struct MemoryTransport {
    hub: MemoryHub,
    requested_id: Option<PeerId>,
    local: Option<PeerId>,
}

impl MemoryTransport {
    /// The hub this handle belongs to.
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl SessionTransport for MemoryTransport {
    fn join(&mut self, options: &JoinOptions) -> Result<PeerId, TransportError> {
        if let Some(local) = &self.local {
            return Err(TransportError::AlreadyJoined(local.clone()));
        }

        let mut inner = self.hub.lock();
        if inner.offline {
            return Err(TransportError::Unavailable("memory hub is offline".into()));
        }
        if inner.peers.len() >= options.max_peers {
            return Err(TransportError::RoomFull { max: options.max_peers });
        }

        let id = self
            .requested_id
            .clone()
            .unwrap_or_else(|| PeerId::new(uuid::Uuid::new_v4().to_string()));
        if inner.peers.contains(&id) {
            return Err(TransportError::AlreadyJoined(id));
        }

        for inbox in inner.inboxes.values_mut() {
            inbox.push(PresenceEvent::Joined(id.clone()));
        }
        // The newcomer hears about everyone already present, then itself
        let mut inbox: Vec<PresenceEvent> = inner
            .peers
            .iter()
            .cloned()
            .map(PresenceEvent::Joined)
            .collect();
        inbox.push(PresenceEvent::Joined(id.clone()));

        inner.peers.push(id.clone());
        inner.inboxes.insert(id.clone(), inbox);
        inner.peer_state.insert(id.clone(), HashMap::new());
        drop(inner);

        debug!(peer = %id.short(), "joined memory hub");
        self.local = Some(id.clone());
        Ok(id)
    }

    fn leave(&mut self) {
        if let Some(local) = self.local.take() {
            self.hub.disconnect(&local);
        }
    }

    fn local_peer(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    fn drain_presence(&mut self) -> Vec<PresenceEvent> {
        let Some(local) = &self.local else {
            return Vec::new();
        };
        self.hub
            .lock()
            .inboxes
            .get_mut(local)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn is_host(&self, peer: &PeerId) -> bool {
        self.hub.lock().peers.first() == Some(peer)
    }

    fn peer_state(&self, peer: &PeerId, key: &str) -> Option<Value> {
        self.hub
            .lock()
            .peer_state
            .get(peer)
            .and_then(|state| state.get(key))
            .cloned()
    }

    fn set_local_state(
        &mut self,
        key: &str,
        value: Value,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        let local = self.local.as_ref().ok_or(TransportError::NotJoined)?;
        let mut inner = self.hub.lock();
        if delivery == Delivery::Unreliable && inner.drop_unreliable {
            inner.unreliable_dropped += 1;
            return Ok(());
        }
        let state = inner
            .peer_state
            .get_mut(local)
            .ok_or(TransportError::NotJoined)?;
        state.insert(key.to_string(), value);
        Ok(())
    }

    fn room_state(&self, key: &str) -> Option<Value> {
        self.hub.lock().room_state.get(key).cloned()
    }

    fn set_room_state(
        &mut self,
        key: &str,
        value: Value,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        if self.local.is_none() {
            return Err(TransportError::NotJoined);
        }
        let mut inner = self.hub.lock();
        if delivery == Delivery::Unreliable && inner.drop_unreliable {
            inner.unreliable_dropped += 1;
            return Ok(());
        }
        inner.room_state.insert(key.to_string(), value);
        Ok(())
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

// =============================================================================
// TESTS
// =============================================================================
