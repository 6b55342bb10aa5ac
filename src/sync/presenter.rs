//! Presenter Hooks
//!
//! The sync layer owns the logical entity tables; whatever draws them
//! implements [`ShadowPresenter`] and is told about every change by id.
//! All methods default to no-ops so a headless peer can pass `&mut ()`.

use crate::core::vec2::Vec2;
use crate::network::transport::PeerId;
use crate::sync::entity::{EntityId, EntityKind, ShadowEntity};

/// Receives visual side effects of synchronization.
pub trait ShadowPresenter {
    /// A shadow was created.
    fn spawn_shadow(&mut self, _shadow: &ShadowEntity) {}

    /// A shadow received a new target and moved one smoothing step.
    fn update_shadow(&mut self, _shadow: &ShadowEntity) {}

    /// A shadow was destroyed.
    fn remove_shadow(&mut self, _id: &EntityId, _kind: EntityKind) {}

    /// A locally owned entity was destroyed by a remote kill.
    fn remove_owned(&mut self, _id: &EntityId, _kind: EntityKind) {}

    /// Draw a cosmetic projectile for a remote shot.
    fn replay_shot(&mut self, _source: &PeerId, _shooter: &EntityId, _origin: Vec2, _angle: f32) {}
}

impl ShadowPresenter for () {}

/// Presenter that records every call, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    /// Spawned shadow ids.
    pub spawned: Vec<EntityId>,
    /// Update count.
    pub updates: usize,
    /// Removed shadow ids.
    pub removed: Vec<EntityId>,
    /// Removed owned ids.
    pub removed_owned: Vec<EntityId>,
    /// Replayed shots as (shooter, origin, angle).
    pub shots: Vec<(EntityId, Vec2, f32)>,
}

#[cfg(test)]
impl ShadowPresenter for RecordingPresenter {
    fn spawn_shadow(&mut self, shadow: &ShadowEntity) {
        self.spawned.push(shadow.id.clone());
    }

    fn update_shadow(&mut self, _shadow: &ShadowEntity) {
        self.updates += 1;
    }

    fn remove_shadow(&mut self, id: &EntityId, _kind: EntityKind) {
        self.removed.push(id.clone());
    }

    fn remove_owned(&mut self, id: &EntityId, _kind: EntityKind) {
        self.removed_owned.push(id.clone());
    }

    fn replay_shot(&mut self, _source: &PeerId, shooter: &EntityId, origin: Vec2, angle: f32) {
        self.shots.push((shooter.clone(), origin, angle));
    }
}
