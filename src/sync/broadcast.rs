//! State Broadcaster
//!
//! Publishes the local peer's state:
//! - one unreliable snapshot array per entity kind, on the broadcast tick,
//!   empty arrays included so absence is observable;
//! - one reliable ring per discrete event kind, flushed on the frame an
//!   event is recorded;
//! - the reliable roster fields, only when they change.

use std::collections::{BTreeMap, VecDeque};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::core::vec2::Vec2;
use crate::network::protocol::{
    encode_events, encode_snapshot, events_key, snapshot_key, DiscreteEvent, EventKind,
    EventPayload, EventRecord, RecordError, ALIVE_KEY, NAME_KEY, SCORE_KEY,
};
use crate::network::transport::{Delivery, PeerId, SessionTransport, TransportError};
use crate::sync::entity::{EntityId, EntityKind, HasKinematics, Serializable};
use crate::sync::registry::EntityRegistry;
use crate::sync::roster::RosterFields;

/// Broadcast errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Transport refused the write.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A value could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] RecordError),
}

// =============================================================================
// EVENT RING
// =============================================================================

/// Bounded, oldest-first window of recent events of one kind.
#[derive(Debug, Clone)]
pub struct EventRing {
    capacity: usize,
    entries: VecDeque<EventRecord>,
    dirty: bool,
}

impl EventRing {
    /// Create a ring holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
            dirty: false,
        }
    }

    /// Append, evicting the oldest entry when full.
    pub fn push(&mut self, record: EventRecord) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
        self.dirty = true;
    }

    /// Entries, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &EventRecord> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changed since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

// =============================================================================
// EVENT CLOCK
// =============================================================================

/// Strictly increasing millisecond timestamps for one peer.
#[derive(Debug, Clone, Default)]
pub struct EventClock {
    last: u64,
}

impl EventClock {
    /// Next timestamp from the wall clock.
    pub fn next(&mut self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.next_at(now)
    }

    /// Next timestamp given the current time, never repeating or going back.
    pub fn next_at(&mut self, now_ms: u64) -> u64 {
        let ts = now_ms.max(self.last + 1);
        self.last = ts;
        ts
    }
}

// =============================================================================
// BROADCASTER
// =============================================================================

/// Publishes everything the local peer owns.
#[derive(Debug)]
pub struct StateBroadcaster {
    local: PeerId,
    clock: EventClock,
    rings: BTreeMap<EventKind, EventRing>,
    roster: RosterFields,
    published_roster: Option<RosterFields>,
}

impl StateBroadcaster {
    /// Create a broadcaster with empty rings of `event_window` entries.
    pub fn new(local: PeerId, event_window: usize, roster: RosterFields) -> Self {
        let rings = EventKind::ALL
            .iter()
            .map(|kind| (*kind, EventRing::new(event_window)))
            .collect();
        Self {
            local,
            clock: EventClock::default(),
            rings,
            roster,
            published_roster: None,
        }
    }

    /// Ring of one event kind.
    pub fn ring(&self, kind: EventKind) -> Option<&EventRing> {
        self.rings.get(&kind)
    }

    fn record(&mut self, payload: EventPayload) -> DiscreteEvent {
        let event = DiscreteEvent {
            source: self.local.clone(),
            timestamp: self.clock.next(),
            payload,
        };
        if let Some(ring) = self.rings.get_mut(&event.kind()) {
            ring.push(event.to_record());
        }
        event
    }

    /// Record a shot fired by a local entity.
    pub fn record_shot(&mut self, shooter: EntityId, origin: Vec2, angle: f32) -> DiscreteEvent {
        self.record(EventPayload::ShotFired { shooter, origin, angle })
    }

    /// Record a kill decided locally.
    pub fn record_kill(&mut self, target: EntityId) -> DiscreteEvent {
        self.record(EventPayload::Kill { target })
    }

    // ===== ROSTER =====

    /// Local roster fields as they will next be published.
    pub fn roster(&self) -> &RosterFields {
        &self.roster
    }

    /// Change the display name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.roster.name = name.into();
    }

    /// Add to the local score.
    pub fn add_score(&mut self, points: u64) -> u64 {
        self.roster.score = self.roster.score.saturating_add(points);
        self.roster.score
    }

    /// Set the local alive flag.
    pub fn set_alive(&mut self, alive: bool) {
        self.roster.alive = alive;
    }

    // ===== PUBLISHING =====

    /// Write one snapshot array per kind. Returns the number of records sent.
    pub fn publish_snapshots(
        &self,
        transport: &mut dyn SessionTransport,
        registry: &EntityRegistry,
    ) -> Result<usize, BroadcastError> {
        let mut sent = 0;
        for kind in EntityKind::ALL {
            // Non-finite entities stay in the array so receivers keep their shadows
            let records: Vec<_> = registry
                .owned_of_kind(kind)
                .inspect(|entity| {
                    let k = entity.kinematics();
                    if !(k.position.is_finite() && k.velocity.is_finite() && k.rotation.is_finite()) {
                        warn!(id = %entity.id, "publishing entity with non-finite kinematics");
                    }
                })
                .map(Serializable::to_record)
                .collect();
            let value = encode_snapshot(&records)?;
            #[cfg(feature = "debug-tracing")]
            trace!(%kind, payload = %value, "snapshot payload");
            transport.set_local_state(&snapshot_key(kind), value, Delivery::Unreliable)?;
            sent += records.len();
        }
        trace!(records = sent, "published snapshots");
        Ok(sent)
    }

    /// Publish every ring that changed since its last flush.
    pub fn flush_events(&mut self, transport: &mut dyn SessionTransport) -> Result<usize, BroadcastError> {
        let mut flushed = 0;
        for (kind, ring) in self.rings.iter_mut().filter(|(_, ring)| ring.is_dirty()) {
            let value = encode_events(ring.records())?;
            transport.set_local_state(&events_key(*kind), value, Delivery::Reliable)?;
            ring.mark_clean();
            debug!(kind = kind.as_str(), entries = ring.len(), "flushed event ring");
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Publish whichever roster fields changed. Returns true if anything was written.
    pub fn publish_roster(&mut self, transport: &mut dyn SessionTransport) -> Result<bool, BroadcastError> {
        if self.published_roster.as_ref() == Some(&self.roster) {
            return Ok(false);
        }
        let previous = self.published_roster.take();
        let changed = |f: fn(&RosterFields) -> serde_json::Value| {
            previous.as_ref().map(f) != Some(f(&self.roster))
        };
        let fields: [(&str, fn(&RosterFields) -> serde_json::Value); 3] = [
            (NAME_KEY, |r| serde_json::Value::from(r.name.clone())),
            (SCORE_KEY, |r| serde_json::Value::from(r.score)),
            (ALIVE_KEY, |r| serde_json::Value::from(r.alive)),
        ];
        for (key, field) in fields {
            if changed(field) {
                transport.set_local_state(key, field(&self.roster), Delivery::Reliable)?;
            }
        }
        self.published_roster = Some(self.roster.clone());
        Ok(true)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryHub;
    use crate::network::protocol::{decode_events, decode_snapshot, SnapshotEntry};
    use crate::network::transport::JoinOptions;
    use crate::sync::entity::{EntityTraits, Kinematics};
    use proptest::prelude::*;
    use serde_json::json;

    fn joined(hub: &MemoryHub, id: &str) -> crate::network::memory::MemoryTransport {
        let mut transport = hub.connect_as(id);
        transport.join(&JoinOptions::default()).unwrap();
        transport
    }

    #[test]
    fn test_clock_strictly_monotonic() {
        let mut clock = EventClock::default();
        assert_eq!(clock.next_at(1000), 1000);
        assert_eq!(clock.next_at(1000), 1001);
        assert_eq!(clock.next_at(900), 1002);
        assert_eq!(clock.next_at(5000), 5000);
    }

    #[test]
    fn test_empty_arrays_published_for_every_kind() {
        let hub = MemoryHub::new();
        let mut a = joined(&hub, "A");
        let mut registry = EntityRegistry::new(PeerId::from("A"), 8);
        registry.spawn_owned(EntityTraits::drone(), Kinematics::default());

        let broadcaster = StateBroadcaster::new(PeerId::from("A"), 4, RosterFields::default());
        assert_eq!(broadcaster.publish_snapshots(&mut a, &registry).unwrap(), 1);

        for kind in EntityKind::ALL {
            let value = a.peer_state(&PeerId::from("A"), &snapshot_key(kind)).unwrap();
            let expected = if kind == EntityKind::Drone { 1 } else { 0 };
            assert_eq!(decode_snapshot(&value).unwrap().len(), expected, "{}", kind);
        }
    }

    #[test]
    fn test_non_finite_entity_published_as_invalid_entry() {
        let hub = MemoryHub::new();
        let mut a = joined(&hub, "A");
        let mut registry = EntityRegistry::new(PeerId::from("A"), 8);
        let id = registry.spawn_owned(EntityTraits::ship(), Kinematics::default());
        registry.owned_mut(&id).unwrap().kinematics.position.x = f32::NAN;

        let broadcaster = StateBroadcaster::new(PeerId::from("A"), 4, RosterFields::default());
        assert_eq!(broadcaster.publish_snapshots(&mut a, &registry).unwrap(), 1);
        let value = a.peer_state(&PeerId::from("A"), &snapshot_key(EntityKind::Ship)).unwrap();
        assert!(value[0]["x"].is_null());
        match &decode_snapshot(&value).unwrap()[..] {
            [SnapshotEntry::Invalid { id: Some(entry_id), .. }] => assert_eq!(entry_id, &id),
            other => panic!("expected one invalid entry with its id, got {:?}", other),
        }
    }

    #[test]
    fn test_ring_flushed_only_when_dirty() {
        let hub = MemoryHub::new();
        let mut a = joined(&hub, "A");
        let mut broadcaster = StateBroadcaster::new(PeerId::from("A"), 4, RosterFields::default());

        assert_eq!(broadcaster.flush_events(&mut a).unwrap(), 0);
        assert!(a.peer_state(&PeerId::from("A"), &events_key(EventKind::Kill)).is_none());

        let kill = broadcaster.record_kill(EntityId::from("alien_B_1"));
        assert!(broadcaster.ring(EventKind::Kill).unwrap().is_dirty());
        assert_eq!(broadcaster.flush_events(&mut a).unwrap(), 1);
        assert_eq!(broadcaster.flush_events(&mut a).unwrap(), 0);

        let value = a.peer_state(&PeerId::from("A"), &events_key(EventKind::Kill)).unwrap();
        let records = decode_events(&value).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().timestamp, kill.timestamp);
    }

    #[test]
    fn test_shot_and_kill_timestamps_distinct() {
        let mut broadcaster = StateBroadcaster::new(PeerId::from("A"), 4, RosterFields::default());
        let shot = broadcaster.record_shot(EntityId::from("alien_A_1"), Vec2::ZERO, 0.0);
        let kill = broadcaster.record_kill(EntityId::from("alien_B_1"));
        assert!(kill.timestamp > shot.timestamp);
    }

    #[test]
    fn test_roster_published_on_change_only() {
        let hub = MemoryHub::new();
        let mut a = joined(&hub, "A");
        let roster = RosterFields { name: "Swift Pilot".into(), score: 0, alive: true };
        let mut broadcaster = StateBroadcaster::new(PeerId::from("A"), 4, roster);

        assert!(broadcaster.publish_roster(&mut a).unwrap());
        assert!(!broadcaster.publish_roster(&mut a).unwrap());
        assert_eq!(a.peer_state(&PeerId::from("A"), NAME_KEY), Some(json!("Swift Pilot")));

        assert_eq!(broadcaster.add_score(100), 100);
        assert!(broadcaster.publish_roster(&mut a).unwrap());
        assert_eq!(a.peer_state(&PeerId::from("A"), SCORE_KEY), Some(json!(100)));
        assert_eq!(a.peer_state(&PeerId::from("A"), ALIVE_KEY), Some(json!(true)));
    }

    proptest! {
        #[test]
        fn prop_ring_never_exceeds_capacity(capacity in 1usize..32, pushes in 0usize..200) {
            let mut ring = EventRing::new(capacity);
            for i in 0..pushes {
                ring.push(EventRecord {
                    timestamp: i as u64,
                    alien_id: None,
                    target_id: Some(EntityId::from("x")),
                    x: None,
                    y: None,
                    angle: None,
                });
            }
            prop_assert!(ring.len() <= capacity);
            prop_assert_eq!(ring.len(), pushes.min(capacity));
            if pushes > 0 {
                let newest = ring.records().last().map(|r| r.timestamp);
                prop_assert_eq!(newest, Some(pushes as u64 - 1));
            }
        }
    }
}
