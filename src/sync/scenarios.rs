//! Multi-peer scenarios over a shared in-memory room.

use proptest::prelude::*;

use crate::config::SyncConfig;
use crate::core::vec2::Vec2;
use crate::network::memory::MemoryHub;
use crate::network::transport::PeerId;
use crate::sync::entity::{DepthLayer, EntityId, EntityKind, EntityTraits, Kinematics};
use crate::sync::events::{RemovalReason, SyncEvent};
use crate::sync::peer::SyncPeer;
use crate::sync::presenter::RecordingPresenter;

fn room(ids: &[&str], config: &SyncConfig) -> (MemoryHub, Vec<SyncPeer>) {
    let hub = MemoryHub::new();
    let peers = ids
        .iter()
        .map(|id| SyncPeer::connect(Box::new(hub.connect_as(*id)), config.clone()).unwrap())
        .collect();
    (hub, peers)
}

fn tick_all(peers: &mut [SyncPeer]) {
    for peer in peers.iter_mut() {
        peer.update(&mut ()).unwrap();
    }
}

fn comet_at(x: f32, y: f32) -> Kinematics {
    Kinematics::new(Vec2::new(x, y), Vec2::ZERO, 0.0)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[test]
fn test_spawn_visible_after_one_interval() {
    let (_hub, mut peers) = room(&["A", "B"], &SyncConfig::default());
    let c1 = peers[0].spawn_owned(EntityTraits::obstacle(DepthLayer::Near, 30.0), comet_at(100.0, 100.0));

    tick_all(&mut peers);

    let shadows = peers[1].shadow_entities(EntityKind::Obstacle);
    assert_eq!(shadows.len(), 1);
    assert_eq!(shadows[0].id, c1);
    assert_eq!(shadows[0].owner, PeerId::from("A"));
    assert_eq!(shadows[0].current.position, Vec2::new(100.0, 100.0));
    assert_eq!(shadows[0].traits, EntityTraits::obstacle(DepthLayer::Near, 30.0));
    assert!(peers[0].shadow_entities(EntityKind::Obstacle).is_empty());
}

#[test]
fn test_local_destroy_removes_shadow_after_next_interval() {
    let config = SyncConfig::default();
    let (_hub, mut peers) = room(&["A", "B"], &config);
    let c1 = peers[0].spawn_owned(EntityTraits::obstacle(DepthLayer::Mid, 12.0), comet_at(0.0, 0.0));
    tick_all(&mut peers);
    assert!(peers[1].shadow(&c1).is_some());

    let mut rx = peers[1].subscribe();
    peers[0].despawn_owned(&c1);

    // Still shadowed until A's next broadcast
    for _ in 1..config.broadcast_interval_frames {
        tick_all(&mut peers);
        assert!(peers[1].shadow(&c1).is_some());
    }
    tick_all(&mut peers);
    assert!(peers[1].shadow(&c1).is_none());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SyncEvent::ShadowRemoved { id, reason: RemovalReason::Absent, .. } if *id == c1
    )));
}

#[test]
fn test_non_finite_owner_state_keeps_remote_shadow() {
    let config = SyncConfig::default();
    let (_hub, mut peers) = room(&["A", "B"], &config);
    let ship = peers[0].spawn_owned(EntityTraits::ship(), comet_at(10.0, 10.0));
    tick_all(&mut peers);
    assert!(peers[1].shadow(&ship).is_some());

    let mut rx = peers[1].subscribe();
    peers[0].owned_mut(&ship).unwrap().kinematics.position.x = f32::NAN;
    for _ in 0..config.broadcast_interval_frames {
        tick_all(&mut peers);
    }
    let shadow = peers[1].shadow(&ship).unwrap();
    assert!(shadow.current.position.is_finite());

    peers[0].owned_mut(&ship).unwrap().kinematics.position.x = 20.0;
    for _ in 0..config.broadcast_interval_frames {
        tick_all(&mut peers);
    }
    assert!(peers[1].shadow(&ship).is_some());
    assert!(!drain(&mut rx).iter().any(|e| matches!(e, SyncEvent::ShadowRemoved { .. })));
}

#[test]
fn test_double_kill_race_second_is_noop() {
    let (_hub, mut peers) = room(&["A", "B", "C", "D"], &SyncConfig::default());
    let a1 = peers[3].spawn_owned(EntityTraits::drone(), comet_at(50.0, 50.0));
    // D publishes last in the round, so everyone else sees it one frame later
    tick_all(&mut peers);
    tick_all(&mut peers);
    for peer in &peers[..3] {
        assert!(peer.shadow(&a1).is_some());
    }

    // A and B decide the kill independently, before hearing about each other
    let mut presenter = RecordingPresenter::default();
    let first = peers[0].report_kill(&a1, 50, &mut presenter).unwrap();
    let second = peers[1].report_kill(&a1, 50, &mut presenter).unwrap();
    assert_ne!(first.source, second.source);
    assert_eq!(presenter.removed.len(), 2);

    let mut rx = peers[2].subscribe();
    let mut c_presenter = RecordingPresenter::default();
    peers[0].update(&mut ()).unwrap();
    peers[1].update(&mut ()).unwrap();
    let report = peers[2].update(&mut c_presenter).unwrap();

    assert_eq!(report.events_applied, 2);
    assert_eq!(c_presenter.removed, vec![a1.clone()]);
    let removals = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::ShadowRemoved { reason: RemovalReason::Killed, .. }))
        .count();
    assert_eq!(removals, 1);

    // The owner loses it once; every peer ends without it
    peers[3].update(&mut ()).unwrap();
    assert!(peers[3].owned_entities(EntityKind::Drone).is_empty());
    for _ in 0..24 {
        tick_all(&mut peers);
    }
    for peer in &peers {
        assert!(peer.shadow(&a1).is_none());
    }
    // Both deciders kept their credit
    assert_eq!(peers[0].roster().score, 50);
    assert_eq!(peers[1].roster().score, 50);
}

#[test]
fn test_stale_snapshot_cannot_resurrect_killed_shadow() {
    let (_hub, mut peers) = room(&["A", "B"], &SyncConfig::default());
    let a1 = peers[1].spawn_owned(EntityTraits::drone(), comet_at(0.0, 0.0));
    tick_all(&mut peers);
    tick_all(&mut peers);
    assert!(peers[0].shadow(&a1).is_some());

    // A kills; B's published snapshot still lists a1 until B processes it
    peers[0].report_kill(&a1, 10, &mut ()).unwrap();
    peers[0].update(&mut ()).unwrap();
    assert!(peers[0].shadow(&a1).is_none());

    peers[1].update(&mut ()).unwrap();
    assert!(peers[1].owned_entities(EntityKind::Drone).is_empty());
    for _ in 0..12 {
        tick_all(&mut peers);
        assert!(peers[0].shadow(&a1).is_none());
    }
}

#[test]
fn test_quit_purges_synchronously() {
    let (hub, mut peers) = room(&["A", "B", "D"], &SyncConfig::default());
    let c5 = peers[2].spawn_owned(EntityTraits::obstacle(DepthLayer::Far, 80.0), comet_at(10.0, 10.0));
    let own = peers[0].spawn_owned(EntityTraits::ship(), comet_at(0.0, 0.0));
    tick_all(&mut peers);
    tick_all(&mut peers);
    assert!(peers[0].shadow(&c5).is_some());

    let mut rx = peers[0].subscribe();
    hub.disconnect(&PeerId::from("D"));
    let d = peers.pop().unwrap();

    // Frame 2 is not a broadcast frame: removal cannot come from absence
    let mut presenter = RecordingPresenter::default();
    let report = peers[0].update(&mut presenter).unwrap();
    assert_eq!(report.snapshots_sent, None);
    assert_eq!(report.left, vec![PeerId::from("D")]);
    assert!(peers[0].shadow(&c5).is_none());
    assert_eq!(presenter.removed, vec![c5.clone()]);
    assert_eq!(peers[0].owned_entities(EntityKind::Ship)[0].id, own);
    assert!(report.leaderboard_rebuilt);
    assert_eq!(peers[0].leaderboard().len(), 2);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ShadowRemoved { reason: RemovalReason::OwnerQuit, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::PlayerLeft { peer, purged: 1 } if peer.as_str() == "D"
    )));
    drop(d);
}

#[test]
fn test_stationary_target_error_negligible_within_thirty_ticks() {
    let config = SyncConfig::default();
    let (_hub, mut peers) = room(&["A", "B"], &config);
    let ship = peers[0].spawn_owned(EntityTraits::ship(), comet_at(0.0, 0.0));
    tick_all(&mut peers);

    if let Some(entity) = peers[0].owned_mut(&ship) {
        entity.kinematics.position = Vec2::new(1.0, 0.0);
    }

    // Wait for the new target to land
    let mut frames = 0;
    while peers[1].shadow(&ship).map(|s| s.target.position.x) != Some(1.0) {
        tick_all(&mut peers);
        frames += 1;
        assert!(frames <= config.broadcast_interval_frames, "target never arrived");
    }

    let mut ticks = 1;
    while peers[1].shadow(&ship).map(|s| s.position_error()).unwrap_or(0.0) >= 0.01 {
        tick_all(&mut peers);
        ticks += 1;
        assert!(ticks <= 30, "error still {:?} after {} ticks", peers[1].shadow(&ship).map(|s| s.position_error()), ticks);
    }
}

#[test]
fn test_moving_entity_converges_within_two_intervals() {
    let config = SyncConfig::default();
    let (_hub, mut peers) = room(&["A", "B"], &config);
    let comet = peers[0].spawn_owned(
        EntityTraits::obstacle(DepthLayer::Mid, 20.0),
        Kinematics::new(Vec2::ZERO, Vec2::new(2.0, 1.0), 0.3),
    );

    for _ in 0..(2 * config.broadcast_interval_frames) {
        peers[0].step_owned();
        tick_all(&mut peers);
    }

    // Stop, then give the last snapshot one interval to land
    if let Some(entity) = peers[0].owned_mut(&comet) {
        entity.kinematics.velocity = Vec2::ZERO;
    }
    for _ in 0..config.broadcast_interval_frames {
        tick_all(&mut peers);
    }
    let owned = peers[0].owned_entities(EntityKind::Obstacle)[0].kinematics;
    let shadow = peers[1].shadow(&comet).unwrap();
    assert_eq!(shadow.target.position, owned.position);
    assert_eq!(shadow.target.velocity, Vec2::ZERO);
}

#[test]
fn test_shots_replayed_once_and_memory_bounded() {
    let config = SyncConfig {
        event_window: 5,
        dedup_window: 8,
        ..Default::default()
    };
    let (_hub, mut peers) = room(&["A", "B"], &config);
    let shooter = peers[1].spawn_owned(EntityTraits::drone(), comet_at(3.0, 4.0));

    let mut presenter = RecordingPresenter::default();
    for frame in 0..60 {
        if frame % 2 == 0 {
            peers[1].fire_shot(&shooter, frame as f32 * 0.1).unwrap();
        }
        peers[1].update(&mut ()).unwrap();
        peers[0].update(&mut presenter).unwrap();
        assert!(peers[0].dedup_window_len() <= config.dedup_window);
    }
    assert_eq!(presenter.shots.len(), 30);
    assert!(presenter.shots.iter().all(|(id, origin, _)| *id == shooter && *origin == Vec2::new(3.0, 4.0)));

    // Nothing new: replaying the same rings applies nothing
    for _ in 0..10 {
        let report = peers[0].update(&mut presenter).unwrap();
        assert_eq!(report.events_applied, 0);
    }
    assert_eq!(presenter.shots.len(), 30);
}

#[test]
fn test_leaderboard_sorted_with_names() {
    let (_hub, mut peers) = room(&["A", "B", "C"], &SyncConfig::default());
    peers[1].add_score(300);
    peers[2].add_score(100);
    tick_all(&mut peers);
    // Roster fields land on frame 0; the next rebuild is on frame 90
    for _ in 0..90 {
        tick_all(&mut peers);
    }
    let board = peers[0].leaderboard();
    let order: Vec<&str> = board.iter().map(|r| r.peer_id.as_str()).collect();
    assert_eq!(order, vec!["B", "C", "A"]);
    assert!(board[2].is_local);
    assert!(board.iter().all(|r| r.name != "Unknown"));
}

#[test]
fn test_converges_after_random_unreliable_loss() {
    use rand::{Rng, SeedableRng};

    let config = SyncConfig::default();
    let (hub, mut peers) = room(&["A", "B"], &config);
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let comets: Vec<EntityId> = (0..5)
        .map(|i| {
            peers[0].spawn_owned(
                EntityTraits::obstacle(DepthLayer::Mid, 10.0),
                Kinematics::new(Vec2::new(i as f32 * 50.0, 0.0), Vec2::new(0.0, 1.5), 0.0),
            )
        })
        .collect();

    for _ in 0..120 {
        hub.set_unreliable_loss(rng.gen_bool(0.5));
        peers[0].step_owned();
        tick_all(&mut peers);
    }
    hub.set_unreliable_loss(false);
    for id in &comets {
        if let Some(entity) = peers[0].owned_mut(id) {
            entity.kinematics.velocity = Vec2::ZERO;
        }
    }
    for _ in 0..(2 * config.broadcast_interval_frames) {
        tick_all(&mut peers);
    }

    for id in &comets {
        let owned = peers[0].registry().owned(id).unwrap().kinematics;
        let shadow = peers[1].shadow(id).unwrap();
        assert_eq!(shadow.target.position, owned.position);
    }
    assert_eq!(peers[1].shadow_entities(EntityKind::Obstacle).len(), comets.len());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_ownership_exclusive(
        spawns in proptest::collection::vec((0usize..3, 0usize..4), 1..20),
        despawn_every in 1usize..5,
        frames in 1u32..40,
    ) {
        let (_hub, mut peers) = room(&["A", "B", "C"], &SyncConfig::default());
        let mut spawned: Vec<(usize, EntityId)> = Vec::new();
        for (i, (owner, kind)) in spawns.iter().enumerate() {
            let traits = match *kind {
                0 => EntityTraits::ship(),
                1 => EntityTraits::obstacle(DepthLayer::Near, 5.0),
                2 => EntityTraits::drone(),
                _ => EntityTraits::projectile(),
            };
            let id = peers[*owner].spawn_owned(traits, comet_at(i as f32, 0.0));
            spawned.push((*owner, id));
        }
        for frame in 0..frames {
            if frame as usize % despawn_every == 0 {
                if let Some((owner, id)) = spawned.pop() {
                    peers[owner].despawn_owned(&id);
                }
            }
            tick_all(&mut peers);
        }

        for peer in &peers {
            let local = peer.local_id().clone();
            for shadow in peer.registry().shadows() {
                prop_assert_ne!(&shadow.owner, &local);
                prop_assert!(peer.registry().owned(&shadow.id).is_none());
            }
            for owned in peer.registry().owned_entities() {
                prop_assert_eq!(&owned.owner, &local);
            }
        }
    }
}
