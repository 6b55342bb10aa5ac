//! Sync Peer
//!
//! One player's whole sync stack behind a single per-frame entry point.
//!
//! ```text
//! update(presenter)
//!   1. presence    joins, quits (quits purge shadows right here)
//!   2. ingest      every remote snapshot channel -> shadow table
//!   3. replay      every remote event ring -> deduplicator -> effects
//!   4. flush       dirty local event rings, changed roster fields
//!   5. broadcast   snapshots, when frame % broadcast_interval == 0
//!   6. leaderboard when frame % leaderboard_interval == 0, or membership changed
//!   7. frame += 1
//! ```
//!
//! Everything runs on the caller's thread; no component takes a lock.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::core::rng::SeededRng;
use crate::network::memory::MemoryHub;
use crate::network::protocol::{DiscreteEvent, WorldOrigin};
use crate::network::session::{Peer, PresenceChange, Session, SessionMode};
use crate::network::transport::{JoinOptions, PeerId, SessionTransport, TransportError};
use crate::sync::broadcast::{BroadcastError, StateBroadcaster};
use crate::sync::dedup::{AppliedEffect, EventDeduplicator};
use crate::sync::entity::{EntityId, EntityKind, EntityTraits, Kinematics, OwnedEntity, ShadowEntity};
use crate::sync::events::{EventBus, RemovalReason, SyncEvent};
use crate::sync::ingest::{IngestReport, StateIngester};
use crate::sync::presenter::ShadowPresenter;
use crate::sync::registry::{EntityRegistry, KillOutcome};
use crate::sync::roster::{LeaderboardRow, RosterAggregator, RosterFields};

/// Errors from the sync peer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Transport failed outside of the join fallback.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Publishing local state failed.
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    /// Operation named an entity this peer does not own.
    #[error("entity {0} is not owned by this peer")]
    NotOwned(EntityId),
}

/// What one call to [`SyncPeer::update`] did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameReport {
    /// Frame number that was processed.
    pub frame: u64,
    /// Peers that joined this frame.
    pub joined: Vec<PeerId>,
    /// Peers that quit this frame.
    pub left: Vec<PeerId>,
    /// Shadow table changes.
    pub ingest: IngestReport,
    /// Remote events applied for the first time.
    pub events_applied: usize,
    /// Records published, if this was a broadcast frame.
    pub snapshots_sent: Option<usize>,
    /// Whether the leaderboard was rebuilt.
    pub leaderboard_rebuilt: bool,
}

/// A single player's synchronization stack.
pub struct SyncPeer {
    config: SyncConfig,
    transport: Box<dyn SessionTransport>,
    session: Session,
    registry: EntityRegistry,
    broadcaster: StateBroadcaster,
    ingester: StateIngester,
    dedup: EventDeduplicator,
    roster: RosterAggregator,
    bus: EventBus,
    frame: u64,
}

impl SyncPeer {
    /// Join through `transport`, proposing the zero world origin.
    pub fn connect(transport: Box<dyn SessionTransport>, config: SyncConfig) -> Result<Self, SyncError> {
        Self::connect_with_origin(transport, config, WorldOrigin { x: 0.0, y: 0.0 })
    }

    /// Join through `transport`. If the join fails the peer keeps running
    /// alone in a private room instead of failing.
    pub fn connect_with_origin(
        mut transport: Box<dyn SessionTransport>,
        config: SyncConfig,
        proposed_origin: WorldOrigin,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let options = JoinOptions { max_peers: config.max_peers };

        let (mut transport, session) = match Session::join(transport.as_mut(), &options, proposed_origin) {
            Ok(session) => (transport, session),
            Err(err) => {
                warn!(error = %err, "transport unavailable, continuing in local-only mode");
                let mut private: Box<dyn SessionTransport> = Box::new(MemoryHub::new().connect());
                let session = Session::join(private.as_mut(), &options, proposed_origin)?.into_local_only();
                (private, session)
            }
        };

        let local = session.local_id().clone();
        let name = config
            .display_name
            .clone()
            .unwrap_or_else(|| SeededRng::from_peer_id(local.as_str()).display_name());
        info!(peer = %local.short(), %name, mode = ?session.mode(), "sync peer ready");

        let mut broadcaster = StateBroadcaster::new(
            local.clone(),
            config.event_window,
            RosterFields { name, score: 0, alive: true },
        );
        broadcaster.publish_roster(transport.as_mut())?;

        Ok(Self {
            registry: EntityRegistry::new(local, config.tombstone_window),
            ingester: StateIngester::new(config.smoothing_alpha),
            dedup: EventDeduplicator::new(config.dedup_window),
            roster: RosterAggregator::new(),
            bus: EventBus::default(),
            frame: 0,
            broadcaster,
            session,
            transport,
            config,
        })
    }

    // ===== LOCAL ENTITIES =====

    /// Spawn an entity owned by this peer.
    pub fn spawn_owned(&mut self, traits: EntityTraits, kinematics: Kinematics) -> EntityId {
        self.registry.spawn_owned(traits, kinematics)
    }

    /// Remove an owned entity; it leaves every peer's view after the next broadcast.
    pub fn despawn_owned(&mut self, id: &EntityId) -> Option<OwnedEntity> {
        self.registry.despawn_owned(id)
    }

    /// Mutable access to an owned entity for the local simulation.
    pub fn owned_mut(&mut self, id: &EntityId) -> Option<&mut OwnedEntity> {
        self.registry.owned_mut(id)
    }

    /// Integrate one frame of motion for every owned entity.
    pub fn step_owned(&mut self) {
        for entity in self.registry.owned_entities_mut() {
            entity.advance();
        }
    }

    /// Record a shot fired by an owned entity, from its current position.
    pub fn fire_shot(&mut self, shooter: &EntityId, angle: f32) -> Result<DiscreteEvent, SyncError> {
        let origin = self
            .registry
            .owned(shooter)
            .map(|entity| entity.kinematics.position)
            .ok_or_else(|| SyncError::NotOwned(shooter.clone()))?;
        Ok(self.broadcaster.record_shot(shooter.clone(), origin, angle))
    }

    /// Decide a kill locally: remove the target here, publish the kill and
    /// credit `points` to the local score.
    ///
    /// Returns `None` when the target is already gone here; nothing is
    /// published and no points are awarded.
    pub fn report_kill(
        &mut self,
        target: &EntityId,
        points: u64,
        presenter: &mut dyn ShadowPresenter,
    ) -> Option<DiscreteEvent> {
        match self.registry.kill(target) {
            KillOutcome::Shadow(shadow) => {
                presenter.remove_shadow(&shadow.id, shadow.kind());
                self.bus.publish(SyncEvent::ShadowRemoved {
                    id: shadow.id.clone(),
                    kind: shadow.kind(),
                    owner: shadow.owner.clone(),
                    reason: RemovalReason::Killed,
                });
            }
            KillOutcome::Owned(entity) => {
                presenter.remove_owned(&entity.id, entity.kind());
            }
            KillOutcome::Absent => {
                debug!(id = %target, "kill target already gone");
                return None;
            }
        }
        let score = self.broadcaster.add_score(points);
        debug!(id = %target, score, "kill decided locally");
        Some(self.broadcaster.record_kill(target.clone()))
    }

    // ===== LOCAL ROSTER =====

    /// Add to the local score.
    pub fn add_score(&mut self, points: u64) -> u64 {
        self.broadcaster.add_score(points)
    }

    /// Set the local alive flag.
    pub fn set_alive(&mut self, alive: bool) {
        self.broadcaster.set_alive(alive);
    }

    /// Change the local display name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.broadcaster.set_name(name);
    }

    /// Local roster fields.
    pub fn roster(&self) -> &RosterFields {
        self.broadcaster.roster()
    }

    // ===== FRAME LOOP =====

    /// Run one frame of synchronization.
    #[instrument(level = "trace", skip_all, fields(frame = self.frame))]
    pub fn update(&mut self, presenter: &mut dyn ShadowPresenter) -> Result<FrameReport, SyncError> {
        let mut report = FrameReport {
            frame: self.frame,
            ..Default::default()
        };

        // 1. Presence
        let mut membership_changed = false;
        for change in self.session.poll(self.transport.as_mut()) {
            membership_changed = true;
            match change {
                PresenceChange::Joined(peer) => {
                    report.joined.push(peer.id.clone());
                    self.bus.publish(SyncEvent::PlayerJoined {
                        peer: peer.id,
                        is_local: peer.is_local,
                    });
                }
                PresenceChange::Left(peer) => {
                    self.handle_quit(&peer.id, presenter);
                    report.left.push(peer.id);
                }
            }
        }

        let remotes = self.session.remote_peer_ids();

        // 2. Snapshots
        for owner in &remotes {
            let ingest = self.ingester.ingest_peer(
                self.transport.as_ref(),
                owner,
                &mut self.registry,
                presenter,
                self.frame,
            );
            for (shadow, reason) in &ingest.removed {
                self.publish_removal(shadow, *reason);
            }
            report.ingest.spawned += ingest.spawned;
            report.ingest.updated += ingest.updated;
            report.ingest.skipped += ingest.skipped;
            report.ingest.removed.extend(ingest.removed);
        }

        // 3. Discrete events
        for source in &remotes {
            let applied = self
                .dedup
                .replay_peer(self.transport.as_ref(), source, &mut self.registry, presenter);
            report.events_applied += applied.len();
            for (event, effect) in applied {
                match effect {
                    AppliedEffect::ShadowKilled(shadow) => self.publish_removal(&shadow, RemovalReason::Killed),
                    AppliedEffect::OwnedKilled(entity) => {
                        if entity.kind() == EntityKind::Ship {
                            self.broadcaster.set_alive(false);
                        }
                        self.bus.publish(SyncEvent::OwnedDestroyed {
                            id: entity.id,
                            kind: entity.traits.kind(),
                            by: event.source,
                        });
                    }
                    AppliedEffect::ShotReplayed | AppliedEffect::NoOp => {}
                }
            }
        }

        // 4-5. Publishing; nothing to publish once we have left
        let published = if self.transport.local_peer().is_some() {
            self.publish_local(&mut report)
        } else {
            Ok(())
        };

        // 6. Leaderboard
        if membership_changed || self.frame % u64::from(self.config.leaderboard_interval_frames) == 0 {
            self.rebuild_leaderboard();
            report.leaderboard_rebuilt = true;
        }

        // A failed publish still ends the frame
        self.frame += 1;
        published?;
        Ok(report)
    }

    fn publish_local(&mut self, report: &mut FrameReport) -> Result<(), SyncError> {
        self.broadcaster.flush_events(self.transport.as_mut())?;
        self.broadcaster.publish_roster(self.transport.as_mut())?;

        if self.frame % u64::from(self.config.broadcast_interval_frames) == 0 {
            let sent = self.broadcaster.publish_snapshots(self.transport.as_mut(), &self.registry)?;
            report.snapshots_sent = Some(sent);
        }
        Ok(())
    }

    fn handle_quit(&mut self, peer: &PeerId, presenter: &mut dyn ShadowPresenter) {
        let purged = self.registry.purge_owner(peer);
        for shadow in &purged {
            presenter.remove_shadow(&shadow.id, shadow.kind());
            self.publish_removal(shadow, RemovalReason::OwnerQuit);
        }
        self.dedup.forget_source(peer);
        self.bus.publish(SyncEvent::PlayerLeft {
            peer: peer.clone(),
            purged: purged.len(),
        });
    }

    fn publish_removal(&self, shadow: &ShadowEntity, reason: RemovalReason) {
        self.bus.publish(SyncEvent::ShadowRemoved {
            id: shadow.id.clone(),
            kind: shadow.kind(),
            owner: shadow.owner.clone(),
            reason,
        });
    }

    fn rebuild_leaderboard(&mut self) {
        let peers = self.session.peer_ids();
        let rows = self
            .roster
            .rebuild(self.transport.as_ref(), &peers, self.session.local_id())
            .to_vec();
        self.bus.publish(SyncEvent::LeaderboardUpdated(rows));
    }

    /// Leave the room. Other peers purge our shadows on their next update.
    pub fn leave(&mut self) {
        info!(peer = %self.session.local_id().short(), "leaving session");
        self.transport.leave();
    }

    // ===== OUTWARD VIEW =====

    /// Owned entities of one kind.
    pub fn owned_entities(&self, kind: EntityKind) -> Vec<&OwnedEntity> {
        self.registry.owned_of_kind(kind).collect()
    }

    /// Shadows of one kind.
    pub fn shadow_entities(&self, kind: EntityKind) -> Vec<&ShadowEntity> {
        self.registry.shadows_of_kind(kind).collect()
    }

    /// Look up a shadow.
    pub fn shadow(&self, id: &EntityId) -> Option<&ShadowEntity> {
        self.registry.shadow(id)
    }

    /// Last rebuilt leaderboard.
    pub fn leaderboard(&self) -> &[LeaderboardRow] {
        self.roster.rows()
    }

    /// Subscribe to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// Known peers in join order.
    pub fn peers(&self) -> Vec<&Peer> {
        self.session.peers_in_join_order()
    }

    /// Local peer id.
    pub fn local_id(&self) -> &PeerId {
        self.session.local_id()
    }

    /// Online or local-only.
    pub fn mode(&self) -> SessionMode {
        self.session.mode()
    }

    /// Agreed world origin.
    pub fn world_origin(&self) -> WorldOrigin {
        self.session.world_origin()
    }

    /// Next frame number to be processed.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Entity tables.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Processed-event keys currently remembered.
    pub fn dedup_window_len(&self) -> usize {
        self.dedup.processed_len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::network::protocol::SCORE_KEY;
    use crate::sync::presenter::RecordingPresenter;
    use serde_json::json;

    fn peer(hub: &MemoryHub, id: &str) -> SyncPeer {
        SyncPeer::connect(Box::new(hub.connect_as(id)), SyncConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let hub = MemoryHub::new();
        let config = SyncConfig {
            smoothing_alpha: 0.0,
            ..Default::default()
        };
        let result = SyncPeer::connect(Box::new(hub.connect()), config);
        assert!(matches!(result, Err(SyncError::Config(ConfigError::InvalidAlpha(_)))));
    }

    #[test]
    fn test_unavailable_transport_falls_back_to_local_only() {
        let hub = MemoryHub::new();
        hub.set_offline(true);
        let mut peer = SyncPeer::connect(Box::new(hub.connect()), SyncConfig::default()).unwrap();
        assert_eq!(peer.mode(), SessionMode::LocalOnly);
        assert!(hub.peers().is_empty());

        // Still fully usable on its own
        let id = peer.spawn_owned(EntityTraits::ship(), Kinematics::default());
        let report = peer.update(&mut ()).unwrap();
        assert_eq!(report.joined, vec![peer.local_id().clone()]);
        assert_eq!(report.snapshots_sent, Some(1));
        assert_eq!(peer.owned_entities(EntityKind::Ship)[0].id, id);
        assert_eq!(peer.leaderboard().len(), 1);
    }

    #[test]
    fn test_frame_advances_when_publishing_fails() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        a.update(&mut ()).unwrap();

        // Dropped by the room without being told
        hub.disconnect(&PeerId::from("A"));
        let broadcast_frames = u64::from(a.config().broadcast_interval_frames);
        let mut errors = 0;
        for _ in 1..=broadcast_frames {
            if let Err(err) = a.update(&mut ()) {
                assert!(matches!(err, SyncError::Broadcast(BroadcastError::Transport(TransportError::NotJoined))));
                errors += 1;
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(a.frame(), broadcast_frames + 1);
        assert!(a.update(&mut ()).is_ok());
        assert_eq!(a.frame(), broadcast_frames + 2);
    }

    #[test]
    fn test_update_after_leave_skips_publishing() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        a.update(&mut ()).unwrap();
        a.leave();

        for _ in 0..24 {
            let report = a.update(&mut ()).unwrap();
            assert_eq!(report.snapshots_sent, None);
        }
        assert_eq!(a.frame(), 25);
        assert!(hub.peers().is_empty());
    }

    #[test]
    fn test_generated_name_is_stable_per_peer() {
        let hub = MemoryHub::new();
        let a = peer(&hub, "A");
        let expected = SeededRng::from_peer_id("A").display_name();
        assert_eq!(a.roster().name, expected);

        let named = SyncPeer::connect(
            Box::new(hub.connect_as("B")),
            SyncConfig {
                display_name: Some("Nova Ace".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(named.roster().name, "Nova Ace");
    }

    #[test]
    fn test_fire_shot_requires_ownership() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        let drone = a.spawn_owned(EntityTraits::drone(), Kinematics::new(Vec2::new(5.0, 6.0), Vec2::ZERO, 0.0));
        let shot = a.fire_shot(&drone, 1.0).unwrap();
        assert_eq!(shot.source, PeerId::from("A"));
        assert!(matches!(
            a.fire_shot(&EntityId::from("alien_B_1"), 1.0),
            Err(SyncError::NotOwned(_))
        ));
    }

    #[test]
    fn test_report_kill_of_unknown_target_publishes_nothing() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        assert!(a.report_kill(&EntityId::from("alien_B_1"), 100, &mut ()).is_none());
        assert_eq!(a.roster().score, 0);
    }

    #[test]
    fn test_broadcast_cadence() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        let mut sent_frames = Vec::new();
        for _ in 0..25 {
            let report = a.update(&mut ()).unwrap();
            if report.snapshots_sent.is_some() {
                sent_frames.push(report.frame);
            }
        }
        assert_eq!(sent_frames, vec![0, 12, 24]);
    }

    #[test]
    fn test_remote_kill_of_owned_ship_marks_dead() {
        let hub = MemoryHub::new();
        let mut a = peer(&hub, "A");
        let mut b = peer(&hub, "B");
        let ship = a.spawn_owned(EntityTraits::ship(), Kinematics::default());
        a.update(&mut ()).unwrap();
        b.update(&mut ()).unwrap();
        assert!(b.shadow(&ship).is_some());

        let mut rx = a.subscribe();
        assert!(b.report_kill(&ship, 100, &mut ()).is_some());
        b.update(&mut ()).unwrap();

        let mut presenter = RecordingPresenter::default();
        a.update(&mut presenter).unwrap();
        assert_eq!(presenter.removed_owned, vec![ship.clone()]);
        assert!(!a.roster().alive);

        let events: Vec<SyncEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::OwnedDestroyed { id, by, .. } if *id == ship && by.as_str() == "B"
        )));

        // B got the credit
        assert_eq!(a.transport.peer_state(&PeerId::from("B"), SCORE_KEY), Some(json!(100)));
    }
}
