//! Event Deduplicator
//!
//! Reliable rings are re-read every frame, so every entry is seen many
//! times. Each `(source, timestamp)` pair is applied at most once.
//!
//! Memory is bounded: the processed set is a sliding window, and for every
//! `(source, kind)` the highest timestamp pushed out of the window is kept as
//! a floor. Anything at or below the floor was already applied.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::network::protocol::{decode_events, events_key, DiscreteEvent, EventKind, EventPayload};
use crate::network::transport::{PeerId, SessionTransport};
use crate::sync::entity::{OwnedEntity, ShadowEntity};
use crate::sync::presenter::ShadowPresenter;
use crate::sync::registry::{EntityRegistry, KillOutcome};

/// Identity of a discrete event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessedEventKey {
    /// Peer that originated the event.
    pub source: PeerId,
    /// Source-local timestamp.
    pub timestamp: u64,
}

impl ProcessedEventKey {
    /// Key of an event.
    pub fn of(event: &DiscreteEvent) -> Self {
        Self {
            source: event.source.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Effect of applying one new event.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedEffect {
    /// A cosmetic projectile was handed to the presenter.
    ShotReplayed,
    /// A shadow was destroyed.
    ShadowKilled(ShadowEntity),
    /// One of our own entities was destroyed.
    OwnedKilled(OwnedEntity),
    /// The target was already gone.
    NoOp,
}

/// Applies each remote event once.
#[derive(Debug)]
pub struct EventDeduplicator {
    window: usize,
    processed: HashSet<ProcessedEventKey>,
    order: VecDeque<(ProcessedEventKey, EventKind)>,
    floors: HashMap<(PeerId, EventKind), u64>,
}

impl EventDeduplicator {
    /// Create a deduplicator remembering `window` keys.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            processed: HashSet::new(),
            order: VecDeque::new(),
            floors: HashMap::new(),
        }
    }

    /// Keys currently remembered.
    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Returns true the first time `event` is seen, recording it.
    pub fn check_and_record(&mut self, event: &DiscreteEvent) -> bool {
        let kind = event.kind();
        if let Some(floor) = self.floors.get(&(event.source.clone(), kind)) {
            if event.timestamp <= *floor {
                return false;
            }
        }
        let key = ProcessedEventKey::of(event);
        if !self.processed.insert(key.clone()) {
            return false;
        }
        self.order.push_back((key, kind));

        while self.order.len() > self.window {
            let Some((evicted, kind)) = self.order.pop_front() else {
                break;
            };
            self.processed.remove(&evicted);
            let floor = self.floors.entry((evicted.source, kind)).or_insert(0);
            *floor = (*floor).max(evicted.timestamp);
        }
        true
    }

    /// Read every ring `source` publishes and apply the entries not seen yet.
    pub fn replay_peer(
        &mut self,
        transport: &dyn SessionTransport,
        source: &PeerId,
        registry: &mut EntityRegistry,
        presenter: &mut dyn ShadowPresenter,
    ) -> Vec<(DiscreteEvent, AppliedEffect)> {
        let mut applied = Vec::new();
        for kind in EventKind::ALL {
            let Some(value) = transport.peer_state(source, &events_key(kind)) else {
                continue;
            };
            let entries = match decode_events(&value) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(peer = %source.short(), kind = kind.as_str(), error = %err, "unreadable event ring");
                    continue;
                }
            };
            for entry in entries {
                let event = match entry.and_then(|record| DiscreteEvent::from_record(source, kind, &record)) {
                    Ok(event) => event,
                    Err(err) => {
                        debug!(peer = %source.short(), kind = kind.as_str(), error = %err, "skipping malformed event");
                        continue;
                    }
                };
                if !self.check_and_record(&event) {
                    continue;
                }
                let effect = Self::apply(&event, registry, presenter);
                applied.push((event, effect));
            }
        }
        applied
    }

    /// Apply one event that passed deduplication.
    pub fn apply(
        event: &DiscreteEvent,
        registry: &mut EntityRegistry,
        presenter: &mut dyn ShadowPresenter,
    ) -> AppliedEffect {
        match &event.payload {
            EventPayload::ShotFired { shooter, origin, angle } => {
                presenter.replay_shot(&event.source, shooter, *origin, *angle);
                AppliedEffect::ShotReplayed
            }
            EventPayload::Kill { target } => match registry.kill(target) {
                KillOutcome::Shadow(shadow) => {
                    presenter.remove_shadow(&shadow.id, shadow.kind());
                    debug!(id = %shadow.id, by = %event.source.short(), "shadow killed");
                    AppliedEffect::ShadowKilled(shadow)
                }
                KillOutcome::Owned(entity) => {
                    presenter.remove_owned(&entity.id, entity.kind());
                    AppliedEffect::OwnedKilled(entity)
                }
                KillOutcome::Absent => AppliedEffect::NoOp,
            },
        }
    }

    /// Drop everything remembered about a departed peer.
    pub fn forget_source(&mut self, source: &PeerId) {
        self.floors.retain(|(peer, _), _| peer != source);
        self.order.retain(|(key, _)| &key.source != source);
        self.processed.retain(|key| &key.source != source);
    }
}

// =============================================================================
// TESTS
// =============================================================================
