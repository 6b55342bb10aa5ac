//! Entity Model
//!
//! Every synchronized entity is either *owned* (simulated here, published to
//! everyone) or a *shadow* (a smoothed local mirror of another peer's owned
//! entity). Both carry the same kind-tagged [`EntityTraits`]; one serialize
//! path and one ingest path handle all four kinds.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::smoothing::{blend_angle, blend_vec};
use crate::core::vec2::Vec2;
use crate::network::protocol::{RecordError, SnapshotRecord};
use crate::network::transport::PeerId;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Session-unique entity id: `<prefix>_<owner>_<counter>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Build the id for the `serial`-th entity of `kind` spawned by `owner`.
    pub fn generate(kind: EntityKind, owner: &PeerId, serial: u64) -> Self {
        Self(format!("{}_{}_{}", kind.id_prefix(), owner, serial))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Entity category. Each kind has its own snapshot channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Player craft.
    Ship,
    /// Comet or planet.
    Obstacle,
    /// AI alien.
    Drone,
    /// Fired shot.
    Projectile,
}

impl EntityKind {
    /// Every kind, in publish order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Ship,
        EntityKind::Obstacle,
        EntityKind::Drone,
        EntityKind::Projectile,
    ];

    /// Channel name fragment.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Ship => "ship",
            EntityKind::Obstacle => "obstacle",
            EntityKind::Drone => "drone",
            EntityKind::Projectile => "projectile",
        }
    }

    /// Prefix used in generated ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            EntityKind::Ship => "ship",
            EntityKind::Obstacle => "comet",
            EntityKind::Drone => "alien",
            EntityKind::Projectile => "shot",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DISCRETE TRAITS
// =============================================================================

/// Parallax layer of an obstacle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DepthLayer {
    /// In front, collides with ships.
    Near,
    /// Middle layer.
    #[default]
    Mid,
    /// Far background.
    Far,
}

/// Alien AI state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    /// Wandering.
    #[default]
    Patrol,
    /// Chasing a ship.
    Attack,
    /// Running away.
    Flee,
    /// Parked on an obstacle.
    Dock,
    /// Destroyed; terminal.
    Dead,
}

/// Kind-specific discrete state, one variant per [`EntityKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum EntityTraits {
    /// Player craft.
    Ship {
        /// Hull points.
        health: f32,
        /// Remaining thrust fuel.
        fuel: f32,
        /// False once destroyed.
        alive: bool,
    },
    /// Comet or planet.
    Obstacle {
        /// Parallax layer.
        depth: DepthLayer,
        /// Radius.
        size: f32,
    },
    /// AI alien.
    Drone {
        /// Hull points.
        health: f32,
        /// AI state.
        behavior: BehaviorState,
        /// Parked on an obstacle.
        docked: bool,
    },
    /// Fired shot.
    Projectile {
        /// Frames since spawn.
        age: u32,
    },
}

impl EntityTraits {
    /// Fresh ship traits.
    pub fn ship() -> Self {
        EntityTraits::Ship { health: 100.0, fuel: 100.0, alive: true }
    }

    /// Fresh obstacle traits.
    pub fn obstacle(depth: DepthLayer, size: f32) -> Self {
        EntityTraits::Obstacle { depth, size }
    }

    /// Fresh drone traits.
    pub fn drone() -> Self {
        EntityTraits::Drone { health: 30.0, behavior: BehaviorState::Patrol, docked: false }
    }

    /// Fresh projectile traits.
    pub fn projectile() -> Self {
        EntityTraits::Projectile { age: 0 }
    }

    /// Kind this variant belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityTraits::Ship { .. } => EntityKind::Ship,
            EntityTraits::Obstacle { .. } => EntityKind::Obstacle,
            EntityTraits::Drone { .. } => EntityKind::Drone,
            EntityTraits::Projectile { .. } => EntityKind::Projectile,
        }
    }

    /// Dead entities are never spawned as shadows and remove existing ones.
    pub fn is_terminal(&self) -> bool {
        match self {
            EntityTraits::Ship { alive, .. } => !alive,
            EntityTraits::Drone { behavior, .. } => *behavior == BehaviorState::Dead,
            EntityTraits::Obstacle { .. } | EntityTraits::Projectile { .. } => false,
        }
    }

    /// Copy the discrete fields into a record.
    pub fn write_record(&self, record: &mut SnapshotRecord) {
        match *self {
            EntityTraits::Ship { health, fuel, alive } => {
                record.health = Some(health);
                record.fuel = Some(fuel);
                record.alive = Some(alive);
            }
            EntityTraits::Obstacle { depth, size } => {
                record.depth = Some(depth);
                record.size = Some(size);
            }
            EntityTraits::Drone { health, behavior, docked } => {
                record.health = Some(health);
                record.behavior_state = Some(behavior);
                record.docked = Some(docked);
            }
            EntityTraits::Projectile { age } => {
                record.age = Some(age);
            }
        }
    }

    /// Read the discrete fields `kind` requires from a record.
    ///
    /// Optional flags (`docked`) default; required fields are errors.
    pub fn from_record(kind: EntityKind, record: &SnapshotRecord) -> Result<Self, RecordError> {
        let missing = |field: &'static str| RecordError::MissingField {
            id: record.id.to_string(),
            field,
        };
        let traits = match kind {
            EntityKind::Ship => EntityTraits::Ship {
                health: record.health.ok_or_else(|| missing("health"))?,
                fuel: record.fuel.unwrap_or(0.0),
                alive: record.alive.ok_or_else(|| missing("alive"))?,
            },
            EntityKind::Obstacle => EntityTraits::Obstacle {
                depth: record.depth.ok_or_else(|| missing("depth"))?,
                size: record.size.ok_or_else(|| missing("size"))?,
            },
            EntityKind::Drone => EntityTraits::Drone {
                health: record.health.ok_or_else(|| missing("health"))?,
                behavior: record.behavior_state.ok_or_else(|| missing("behaviorState"))?,
                docked: record.docked.unwrap_or(false),
            },
            EntityKind::Projectile => EntityTraits::Projectile {
                age: record.age.unwrap_or(0),
            },
        };
        Ok(traits)
    }
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Position, velocity and rotation.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Kinematics {
    /// World position.
    pub position: Vec2,
    /// Units per frame.
    pub velocity: Vec2,
    /// Radians.
    pub rotation: f32,
}

impl Kinematics {
    /// Create kinematics.
    pub fn new(position: Vec2, velocity: Vec2, rotation: f32) -> Self {
        Self { position, velocity, rotation }
    }

    /// Read the continuous fields of a record.
    pub fn from_record(record: &SnapshotRecord) -> Self {
        Self::new(record.position(), record.velocity(), record.rotation)
    }

    /// Move one exponential step toward `target`; rotation takes the short way.
    pub fn blend_toward(&mut self, target: &Kinematics, alpha: f32) {
        self.position = blend_vec(self.position, target.position, alpha);
        self.velocity = blend_vec(self.velocity, target.velocity, alpha);
        self.rotation = blend_angle(self.rotation, target.rotation, alpha);
    }
}

/// Something with a single, fixed owner.
pub trait Ownable {
    /// Entity id.
    fn id(&self) -> &EntityId;
    /// Owning peer.
    fn owner(&self) -> &PeerId;
}

/// Something with continuous motion state.
pub trait HasKinematics {
    /// Current kinematics.
    fn kinematics(&self) -> &Kinematics;
}

/// Something that can be written into a snapshot array.
pub trait Serializable {
    /// Minimal wire record.
    fn to_record(&self) -> SnapshotRecord;
}

// =============================================================================
// OWNED ENTITIES
// =============================================================================

/// Entity simulated by the local peer.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedEntity {
    /// Entity id.
    pub id: EntityId,
    /// Always the local peer.
    pub owner: PeerId,
    /// Motion state.
    pub kinematics: Kinematics,
    /// Kind-specific state.
    pub traits: EntityTraits,
}

impl OwnedEntity {
    /// Entity kind.
    pub fn kind(&self) -> EntityKind {
        self.traits.kind()
    }

    /// Integrate one frame of motion and age projectiles.
    pub fn advance(&mut self) {
        self.kinematics.position = self.kinematics.position + self.kinematics.velocity;
        if let EntityTraits::Projectile { age } = &mut self.traits {
            *age = age.saturating_add(1);
        }
    }
}

impl Ownable for OwnedEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> &PeerId {
        &self.owner
    }
}

impl HasKinematics for OwnedEntity {
    fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }
}

impl Serializable for OwnedEntity {
    fn to_record(&self) -> SnapshotRecord {
        let mut record = SnapshotRecord::new(
            self.id.clone(),
            self.owner.clone(),
            self.kinematics.position,
            self.kinematics.velocity,
            self.kinematics.rotation,
        );
        self.traits.write_record(&mut record);
        record
    }
}

// =============================================================================
// SHADOW ENTITIES
// =============================================================================

/// Local mirror of a remote peer's owned entity.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowEntity {
    /// Entity id.
    pub id: EntityId,
    /// Remote owner.
    pub owner: PeerId,
    /// Displayed (smoothed) motion state.
    pub current: Kinematics,
    /// Last received motion state.
    pub target: Kinematics,
    /// Last received discrete state.
    pub traits: EntityTraits,
    /// Last frame its owner's snapshot still listed it.
    pub last_seen_frame: u64,
}

impl ShadowEntity {
    /// Create a shadow sitting exactly on its first snapshot.
    pub fn from_record(record: &SnapshotRecord, traits: EntityTraits, frame: u64) -> Self {
        let kinematics = Kinematics::from_record(record);
        Self {
            id: record.id.clone(),
            owner: record.owner_id.clone(),
            current: kinematics,
            target: kinematics,
            traits,
            last_seen_frame: frame,
        }
    }

    /// Entity kind.
    pub fn kind(&self) -> EntityKind {
        self.traits.kind()
    }

    /// Retarget to a newer snapshot, then take one smoothing step.
    pub fn apply_record(&mut self, record: &SnapshotRecord, traits: EntityTraits, alpha: f32, frame: u64) {
        self.target = Kinematics::from_record(record);
        self.traits = traits;
        self.last_seen_frame = frame;
        self.current.blend_toward(&self.target, alpha);
    }

    /// Remaining distance to the target position.
    pub fn position_error(&self) -> f32 {
        self.current.position.distance(self.target.position)
    }
}

impl Ownable for ShadowEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn owner(&self) -> &PeerId {
        &self.owner
    }
}

impl HasKinematics for ShadowEntity {
    fn kinematics(&self) -> &Kinematics {
        &self.current
    }
}

// =============================================================================
// TESTS
// =============================================================================
