//! Entity Synchronization
//!
//! Owned/shadow entity tables and the components that keep them in step
//! across peers.
//!
//! ## Module Structure
//!
//! - `entity`: Entity kinds, traits, owned and shadow entities
//! - `registry`: Ownership tables, kills, purges, tombstones
//! - `broadcast`: Snapshot and event-ring publishing
//! - `ingest`: Snapshot reconciliation and smoothing
//! - `dedup`: Exactly-once replay of discrete events
//! - `roster`: Leaderboard derivation
//! - `events`: Typed notifications for game code
//! - `presenter`: Hooks for whatever draws the entities
//! - `peer`: The per-frame loop tying it together

pub mod entity;
pub mod registry;
pub mod broadcast;
pub mod ingest;
pub mod dedup;
pub mod roster;
pub mod events;
pub mod presenter;
pub mod peer;

#[cfg(test)]
mod scenarios;

// Re-export key types
pub use entity::{
    BehaviorState, DepthLayer, EntityId, EntityKind, EntityTraits, HasKinematics, Kinematics,
    Ownable, OwnedEntity, Serializable, ShadowEntity,
};
pub use events::{RemovalReason, SyncEvent};
pub use peer::{FrameReport, SyncError, SyncPeer};
pub use presenter::ShadowPresenter;
pub use roster::LeaderboardRow;
