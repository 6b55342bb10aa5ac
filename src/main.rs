//! Comet Drifters Peer
//!
//! Runs an in-process match between several sync peers sharing one memory
//! room, then logs what each of them ended up seeing.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use comet_sync::{
    EntityId, EntityKind, EntityTraits, Kinematics, MemoryHub, SeededRng, SyncConfig, SyncEvent,
    SyncPeer, Vec2, SIMULATION_RATE, VERSION,
    network::protocol::WorldOrigin,
    sync::entity::DepthLayer,
};

/// Demo length in frames (10 seconds at 60 Hz).
const DEMO_FRAMES: u64 = 600;

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let config = SyncConfig::from_env().context("invalid COMET_SYNC_* configuration")?;

    info!("Comet Drifters Sync v{}", VERSION);
    info!(
        "Simulation: {} Hz, broadcast every {} frames ({} ms), smoothing alpha {}",
        SIMULATION_RATE,
        config.broadcast_interval_frames,
        config.broadcast_interval_ms(),
        config.smoothing_alpha
    );

    demo_session(config)
}

/// Three peers, a double-kill race, a lossy stretch and a disconnect.
fn demo_session(config: SyncConfig) -> Result<()> {
    info!("=== Starting Demo Session ===");

    let hub = MemoryHub::new();
    let mut peers = Vec::new();
    for i in 0..3 {
        // Only the first proposal sticks
        let origin = WorldOrigin { x: 400.0 + i as f32, y: 300.0 };
        let peer = SyncPeer::connect_with_origin(Box::new(hub.connect()), config.clone(), origin)
            .context("failed to start sync peer")?;
        info!("Peer {} is {:?}", peer.local_id().short(), peer.roster().name);
        peers.push(peer);
    }
    let mut events = peers[0].subscribe();

    // Everyone flies a ship and runs two aliens; the first peer also owns the comets
    let mut drones: Vec<Vec<EntityId>> = Vec::new();
    for peer in peers.iter_mut() {
        let origin = peer.world_origin().to_vec2();
        let mut rng = SeededRng::from_peer_id(peer.local_id().as_str());
        let jitter = |rng: &mut SeededRng| Vec2::new(rng.next_unit() * 200.0 - 100.0, rng.next_unit() * 200.0 - 100.0);

        peer.spawn_owned(EntityTraits::ship(), Kinematics::new(origin + jitter(&mut rng), Vec2::ZERO, 0.0));
        let owned: Vec<EntityId> = (0..2)
            .map(|_| {
                let velocity = Vec2::from_angle(rng.next_unit() * std::f32::consts::TAU).scale(0.5);
                peer.spawn_owned(EntityTraits::drone(), Kinematics::new(origin + jitter(&mut rng), velocity, 0.0))
            })
            .collect();
        drones.push(owned);
    }
    {
        let host = &mut peers[0];
        let origin = host.world_origin().to_vec2();
        let mut rng = SeededRng::new(7);
        let layers = [DepthLayer::Near, DepthLayer::Mid, DepthLayer::Far];
        for i in 0..6 {
            let depth = *rng.choose(&layers).unwrap_or(&DepthLayer::Mid);
            let position = origin + Vec2::from_angle(i as f32).scale(250.0);
            let velocity = Vec2::new(0.0, 0.2 + rng.next_unit());
            host.spawn_owned(
                EntityTraits::obstacle(depth, 20.0 + rng.next_unit() * 40.0),
                Kinematics::new(position, velocity, 0.0),
            );
        }
    }

    let race_target = drones[2][0].clone();
    let mut disconnected = false;

    for frame in 0..DEMO_FRAMES {
        if frame == 350 {
            info!("Frame {}: unreliable channel starts dropping everything", frame);
            hub.set_unreliable_loss(true);
        }
        if frame == 380 {
            hub.set_unreliable_loss(false);
            info!("Frame {}: unreliable channel restored ({} writes lost)", frame, hub.unreliable_dropped());
        }

        for (i, peer) in peers.iter_mut().enumerate() {
            peer.step_owned();
            if frame % 30 == 0 {
                if let Some(shooter) = drones.get(i).and_then(|d| d.get(1)) {
                    let angle = frame as f32 * 0.05;
                    if let Err(err) = peer.fire_shot(shooter, angle) {
                        warn!("Peer {} could not fire: {}", peer.local_id().short(), err);
                    }
                }
            }
        }

        // Two peers destroy the same alien before hearing about each other
        if frame == 200 {
            for peer in peers.iter_mut().take(2) {
                match peer.report_kill(&race_target, 100, &mut ()) {
                    Some(event) => info!("Peer {} killed {} at t={}", peer.local_id().short(), race_target, event.timestamp),
                    None => info!("Peer {} found {} already gone", peer.local_id().short(), race_target),
                }
            }
        }

        if frame == 300 && !disconnected {
            let leaving = peers.pop().context("no peer to disconnect")?;
            info!("Frame {}: peer {} drops out", frame, leaving.local_id().short());
            hub.disconnect(leaving.local_id());
            disconnected = true;
        }

        for peer in peers.iter_mut() {
            peer.update(&mut ()).context("sync update failed")?;
        }

        for event in std::iter::from_fn(|| events.try_recv().ok()) {
            match event {
                SyncEvent::PlayerJoined { peer, is_local } => info!("Joined: {} (local: {})", peer.short(), is_local),
                SyncEvent::PlayerLeft { peer, purged } => info!("Left: {} ({} shadows purged)", peer.short(), purged),
                SyncEvent::ShadowRemoved { id, reason, .. } => info!("Shadow {} removed ({:?})", id, reason),
                SyncEvent::OwnedDestroyed { id, by, .. } => info!("Our {} was destroyed by {}", id, by.short()),
                SyncEvent::LeaderboardUpdated(_) => {}
            }
        }
    }

    // Print final results
    info!("=== Session Results ===");
    for peer in &peers {
        let counts: Vec<String> = EntityKind::ALL
            .iter()
            .map(|kind| {
                format!(
                    "{} {}/{}",
                    kind,
                    peer.owned_entities(*kind).len(),
                    peer.shadow_entities(*kind).len()
                )
            })
            .collect();
        info!("Peer {} owned/shadow: {}", peer.local_id().short(), counts.join(", "));
    }

    info!("=== Leaderboard ===");
    for (rank, row) in peers[0].leaderboard().iter().enumerate() {
        info!(
            "{}. {} - {} pts{}{}",
            rank + 1,
            row.name,
            row.score,
            if row.alive { "" } else { " (destroyed)" },
            if row.is_local { " <- you" } else { "" }
        );
    }

    Ok(())
}
