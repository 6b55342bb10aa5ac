//! # Comet Drifters Sync
//!
//! Peer-to-peer entity synchronization for Comet Drifters. Every peer
//! simulates the entities it owns and mirrors everyone else's as smoothed
//! shadows; there is no authoritative server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   COMET DRIFTERS SYNC                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Math and randomness                       │
//! │  ├── vec2.rs     - f32 2D vector                             │
//! │  ├── smoothing.rs- Exponential and shortest-arc blending     │
//! │  └── rng.rs      - Xorshift128+ PRNG, display names          │
//! │                                                              │
//! │  network/        - Transport and wire formats                │
//! │  ├── transport.rs- Injected session transport trait          │
//! │  ├── memory.rs   - In-process transport                      │
//! │  ├── protocol.rs - Snapshot, event and roster schemas        │
//! │  └── session.rs  - Room membership, world origin             │
//! │                                                              │
//! │  sync/           - Ownership and replication                 │
//! │  ├── entity.rs   - Owned and shadow entities                 │
//! │  ├── registry.rs - Id-keyed ownership tables                 │
//! │  ├── broadcast.rs- Snapshot and event-ring publishing        │
//! │  ├── ingest.rs   - Snapshot reconciliation                   │
//! │  ├── dedup.rs    - Exactly-once event replay                 │
//! │  ├── roster.rs   - Leaderboard                               │
//! │  └── peer.rs     - Per-frame loop                            │
//! │                                                              │
//! │  config.rs       - Cadences, windows, env overrides          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Model
//!
//! - Continuous state (position, velocity, rotation) travels in unreliable,
//!   last-value-wins snapshots every broadcast interval.
//! - Discrete events (shots, kills) travel in bounded, reliable rings and are
//!   applied exactly once per `(source, timestamp)`.
//! - A peer only ever writes keys under its own id.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod config;
pub mod network;
pub mod sync;

// Re-export commonly used types
pub use config::{ConfigError, SyncConfig, SIMULATION_RATE};
pub use core::vec2::Vec2;
pub use core::rng::SeededRng;
pub use network::{MemoryHub, PeerId, SessionTransport, TransportError};
pub use sync::{
    EntityId, EntityKind, EntityTraits, Kinematics, LeaderboardRow, ShadowPresenter, SyncError,
    SyncEvent, SyncPeer,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
