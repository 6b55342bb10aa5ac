//! Entity Ownership Registry
//!
//! Two id-keyed tables per peer: entities this peer owns and shadows of
//! everyone else's. An id lives in at most one of them. Ownership is stamped
//! at spawn and never changes.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::{debug, info};

use crate::network::transport::PeerId;
use crate::sync::entity::{EntityId, EntityKind, EntityTraits, Kinematics, OwnedEntity, ShadowEntity};

/// What a kill removed.
#[derive(Debug, Clone, PartialEq)]
pub enum KillOutcome {
    /// A remote entity's shadow.
    Shadow(ShadowEntity),
    /// One of our own entities, killed by a remote decision.
    Owned(OwnedEntity),
    /// Nothing with that id exists here.
    Absent,
}

/// Owned and shadow entity tables for one peer.
#[derive(Debug)]
pub struct EntityRegistry {
    local: PeerId,
    next_serial: u64,
    owned: BTreeMap<EntityId, OwnedEntity>,
    shadows: BTreeMap<EntityId, ShadowEntity>,
    tombstones: VecDeque<EntityId>,
    tombstone_set: HashSet<EntityId>,
    tombstone_window: usize,
}

impl EntityRegistry {
    /// Create empty tables for `local`.
    pub fn new(local: PeerId, tombstone_window: usize) -> Self {
        Self {
            local,
            next_serial: 1,
            owned: BTreeMap::new(),
            shadows: BTreeMap::new(),
            tombstones: VecDeque::new(),
            tombstone_set: HashSet::new(),
            tombstone_window: tombstone_window.max(1),
        }
    }

    /// Local peer id stamped on every spawn.
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    // ===== OWNED =====

    /// Create a locally owned entity and return its id.
    pub fn spawn_owned(&mut self, traits: EntityTraits, kinematics: Kinematics) -> EntityId {
        let kind = traits.kind();
        let id = EntityId::generate(kind, &self.local, self.next_serial);
        self.next_serial += 1;
        self.owned.insert(
            id.clone(),
            OwnedEntity {
                id: id.clone(),
                owner: self.local.clone(),
                kinematics,
                traits,
            },
        );
        debug!(%id, %kind, "spawned owned entity");
        id
    }

    /// Remove a locally owned entity. Peers see it vanish on the next broadcast.
    pub fn despawn_owned(&mut self, id: &EntityId) -> Option<OwnedEntity> {
        let removed = self.owned.remove(id);
        if removed.is_some() {
            debug!(%id, "despawned owned entity");
        }
        removed
    }

    /// Look up an owned entity.
    pub fn owned(&self, id: &EntityId) -> Option<&OwnedEntity> {
        self.owned.get(id)
    }

    /// Mutable access for the local simulation.
    pub fn owned_mut(&mut self, id: &EntityId) -> Option<&mut OwnedEntity> {
        self.owned.get_mut(id)
    }

    /// Whether `id` is owned here.
    pub fn is_owned(&self, id: &EntityId) -> bool {
        self.owned.contains_key(id)
    }

    /// Every owned entity, in id order.
    pub fn owned_entities(&self) -> impl Iterator<Item = &OwnedEntity> {
        self.owned.values()
    }

    /// Every owned entity, mutably.
    pub fn owned_entities_mut(&mut self) -> impl Iterator<Item = &mut OwnedEntity> {
        self.owned.values_mut()
    }

    /// Owned entities of one kind.
    pub fn owned_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &OwnedEntity> {
        self.owned.values().filter(move |e| e.kind() == kind)
    }

    // ===== SHADOWS =====

    /// Look up a shadow.
    pub fn shadow(&self, id: &EntityId) -> Option<&ShadowEntity> {
        self.shadows.get(id)
    }

    /// Mutable shadow access for the ingester.
    pub fn shadow_mut(&mut self, id: &EntityId) -> Option<&mut ShadowEntity> {
        self.shadows.get_mut(id)
    }

    /// Every shadow, in id order.
    pub fn shadows(&self) -> impl Iterator<Item = &ShadowEntity> {
        self.shadows.values()
    }

    /// Shadows of one kind.
    pub fn shadows_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &ShadowEntity> {
        self.shadows.values().filter(move |s| s.kind() == kind)
    }

    /// Ids of the shadows `owner` owns of `kind`.
    pub fn shadow_ids(&self, owner: &PeerId, kind: EntityKind) -> BTreeSet<EntityId> {
        self.shadows
            .values()
            .filter(|s| &s.owner == owner && s.kind() == kind)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Add a shadow. Refused for our own ids and for tombstoned ids.
    pub fn insert_shadow(&mut self, shadow: ShadowEntity) -> bool {
        if shadow.owner == self.local || self.owned.contains_key(&shadow.id) {
            return false;
        }
        if self.tombstone_set.contains(&shadow.id) {
            return false;
        }
        self.shadows.insert(shadow.id.clone(), shadow);
        true
    }

    /// Remove a shadow.
    pub fn remove_shadow(&mut self, id: &EntityId) -> Option<ShadowEntity> {
        self.shadows.remove(id)
    }

    /// Number of shadows held.
    pub fn shadow_count(&self) -> usize {
        self.shadows.len()
    }

    // ===== REMOVAL =====

    /// Apply a kill decided anywhere. Idempotent: a second kill is `Absent`.
    ///
    /// Ids not owned here are tombstoned so a snapshot still carrying them
    /// cannot bring them back.
    pub fn kill(&mut self, id: &EntityId) -> KillOutcome {
        if let Some(entity) = self.owned.remove(id) {
            debug!(%id, "owned entity killed remotely");
            return KillOutcome::Owned(entity);
        }
        self.tombstone(id.clone());
        match self.shadows.remove(id) {
            Some(shadow) => KillOutcome::Shadow(shadow),
            None => KillOutcome::Absent,
        }
    }

    /// Drop every shadow owned by `owner`. Local entities are untouched.
    pub fn purge_owner(&mut self, owner: &PeerId) -> Vec<ShadowEntity> {
        let ids: Vec<EntityId> = self
            .shadows
            .values()
            .filter(|s| &s.owner == owner)
            .map(|s| s.id.clone())
            .collect();
        let purged: Vec<ShadowEntity> = ids.iter().filter_map(|id| self.shadows.remove(id)).collect();
        if !purged.is_empty() {
            info!(peer = %owner.short(), count = purged.len(), "purged shadows of departed peer");
        }
        purged
    }

    /// Whether `id` was recently killed.
    pub fn is_tombstoned(&self, id: &EntityId) -> bool {
        self.tombstone_set.contains(id)
    }

    /// Tombstones currently remembered.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    fn tombstone(&mut self, id: EntityId) {
        if !self.tombstone_set.insert(id.clone()) {
            return;
        }
        self.tombstones.push_back(id);
        while self.tombstones.len() > self.tombstone_window {
            if let Some(evicted) = self.tombstones.pop_front() {
                self.tombstone_set.remove(&evicted);
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
