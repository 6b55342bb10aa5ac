//! Wire Schemas
//!
//! Everything peers publish through the transport, as JSON values:
//!
//! | key                 | scope | delivery   | value                      |
//! |---------------------|-------|------------|----------------------------|
//! | `worldOrigin`       | room  | reliable   | [`WorldOrigin`]            |
//! | `snapshot/<kind>`   | peer  | unreliable | array of [`SnapshotRecord`]|
//! | `events/<kind>`     | peer  | reliable   | array of [`EventRecord`]   |
//! | `name`              | peer  | reliable   | string                     |
//! | `score`             | peer  | reliable   | integer                    |
//! | `alive`             | peer  | reliable   | bool                       |
//!
//! Decoding is per entry: one bad record or event never invalidates the
//! rest of its array.

use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::vec2::Vec2;
use crate::network::transport::PeerId;
use crate::sync::entity::{BehaviorState, DepthLayer, EntityId, EntityKind};

/// Room key holding the shared world origin.
pub const WORLD_ORIGIN_KEY: &str = "worldOrigin";
/// Peer key holding the display name.
pub const NAME_KEY: &str = "name";
/// Peer key holding the score.
pub const SCORE_KEY: &str = "score";
/// Peer key holding the alive flag.
pub const ALIVE_KEY: &str = "alive";

/// Peer key for one entity kind's snapshot.
pub fn snapshot_key(kind: EntityKind) -> String {
    format!("snapshot/{}", kind.as_str())
}

/// Peer key for one discrete event kind's ring.
pub fn events_key(kind: EventKind) -> String {
    format!("events/{}", kind.as_str())
}

/// Decoding errors for wire values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    /// Channel value is not a JSON array.
    #[error("expected an array")]
    NotAnArray,
    /// Entry does not match the schema.
    #[error("malformed entry: {0}")]
    Malformed(String),
    /// Entry lacks a field its kind requires.
    #[error("entry {id} is missing field {field}")]
    MissingField {
        /// Entity or event id.
        id: String,
        /// Field name.
        field: &'static str,
    },
    /// Entry carries NaN or infinite kinematics.
    #[error("entry {0} has non-finite kinematics")]
    NonFinite(String),
    /// Record names a different owner than the channel it was read from.
    #[error("entry {id} claims owner {claimed}")]
    OwnerMismatch {
        /// Entity id.
        id: String,
        /// Owner written in the record.
        claimed: PeerId,
    },
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Malformed(err.to_string())
    }
}

// =============================================================================
// WORLD ORIGIN
// =============================================================================

/// Shared spawn reference point, picked once by the first peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldOrigin {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl WorldOrigin {
    /// As a vector.
    pub fn to_vec2(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// One entity's minimal continuous state in a snapshot array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Entity id.
    pub id: EntityId,
    /// Owning peer.
    pub owner_id: PeerId,
    /// Position X.
    pub x: f32,
    /// Position Y.
    pub y: f32,
    /// Velocity X.
    pub vx: f32,
    /// Velocity Y.
    pub vy: f32,
    /// Rotation (radians).
    pub rotation: f32,
    /// Parallax layer (obstacles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<DepthLayer>,
    /// Radius (obstacles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    /// Health (ships, drones).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<f32>,
    /// AI state (drones).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior_state: Option<BehaviorState>,
    /// Docked to an obstacle (drones).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docked: Option<bool>,
    /// Fuel (ships).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<f32>,
    /// Alive flag (ships).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alive: Option<bool>,
    /// Frames since spawn (projectiles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
}

impl SnapshotRecord {
    /// Record with only the continuous fields set.
    pub fn new(id: EntityId, owner_id: PeerId, position: Vec2, velocity: Vec2, rotation: f32) -> Self {
        Self {
            id,
            owner_id,
            x: position.x,
            y: position.y,
            vx: velocity.x,
            vy: velocity.y,
            rotation,
            depth: None,
            size: None,
            health: None,
            behavior_state: None,
            docked: None,
            fuel: None,
            alive: None,
            age: None,
        }
    }

    /// Position as a vector.
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Velocity as a vector.
    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.vx, self.vy)
    }

    /// Reject NaN/infinite kinematics.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.position().is_finite() && self.velocity().is_finite() && self.rotation.is_finite() {
            Ok(())
        } else {
            Err(RecordError::NonFinite(self.id.to_string()))
        }
    }
}

/// One decoded entry of a snapshot array.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEntry {
    /// Well-formed record.
    Valid(SnapshotRecord),
    /// Unusable entry; `id` is kept when it could still be read so the
    /// entity is not mistaken for absent.
    Invalid {
        /// Entity id, if present.
        id: Option<EntityId>,
        /// What was wrong.
        error: RecordError,
    },
}

/// Encode a snapshot array.
///
/// Non-finite floats encode as `null`; the entry still carries its id and
/// decodes as [`SnapshotEntry::Invalid`].
pub fn encode_snapshot(records: &[SnapshotRecord]) -> Result<Value, RecordError> {
    Ok(serde_json::to_value(records)?)
}

/// Decode a snapshot array entry by entry.
pub fn decode_snapshot(value: &Value) -> Result<Vec<SnapshotEntry>, RecordError> {
    let entries = value.as_array().ok_or(RecordError::NotAnArray)?;
    Ok(entries.iter().map(decode_snapshot_entry).collect())
}

fn decode_snapshot_entry(raw: &Value) -> SnapshotEntry {
    let id = raw.get("id").and_then(Value::as_str).map(EntityId::from);
    match SnapshotRecord::deserialize(raw) {
        Ok(record) => match record.validate() {
            Ok(()) => SnapshotEntry::Valid(record),
            Err(error) => SnapshotEntry::Invalid { id, error },
        },
        Err(err) => SnapshotEntry::Invalid {
            id,
            error: err.into(),
        },
    }
}

// =============================================================================
// DISCRETE EVENTS
// =============================================================================

/// Kind of discrete, rare event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A drone or ship fired.
    ShotFired,
    /// An entity was destroyed.
    Kill,
}

impl EventKind {
    /// Every event kind, in publish order.
    pub const ALL: [EventKind; 2] = [EventKind::ShotFired, EventKind::Kill];

    /// Channel name fragment.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ShotFired => "shots",
            EventKind::Kill => "kills",
        }
    }
}

/// One entry of a published event ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Monotonic per source peer.
    pub timestamp: u64,
    /// Firing entity (shots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alien_id: Option<EntityId>,
    /// Destroyed entity (kills).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<EntityId>,
    /// Origin X (shots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    /// Origin Y (shots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    /// Firing angle (shots).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

/// Typed content of a discrete event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A shot left `shooter` at `origin`, heading `angle`.
    ShotFired {
        /// Firing entity.
        shooter: EntityId,
        /// Muzzle position.
        origin: Vec2,
        /// Heading (radians).
        angle: f32,
    },
    /// `target` was destroyed.
    Kill {
        /// Destroyed entity.
        target: EntityId,
    },
}

/// A discrete event attributed to its source peer.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteEvent {
    /// Peer that originated the event.
    pub source: PeerId,
    /// Monotonic per source.
    pub timestamp: u64,
    /// What happened.
    pub payload: EventPayload,
}

impl DiscreteEvent {
    /// Event kind.
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::ShotFired { .. } => EventKind::ShotFired,
            EventPayload::Kill { .. } => EventKind::Kill,
        }
    }

    /// Wire form.
    pub fn to_record(&self) -> EventRecord {
        match &self.payload {
            EventPayload::ShotFired { shooter, origin, angle } => EventRecord {
                timestamp: self.timestamp,
                alien_id: Some(shooter.clone()),
                target_id: None,
                x: Some(origin.x),
                y: Some(origin.y),
                angle: Some(*angle),
            },
            EventPayload::Kill { target } => EventRecord {
                timestamp: self.timestamp,
                alien_id: None,
                target_id: Some(target.clone()),
                x: None,
                y: None,
                angle: None,
            },
        }
    }

    /// Interpret a wire entry read from `source`'s ring of `kind`.
    pub fn from_record(source: &PeerId, kind: EventKind, record: &EventRecord) -> Result<Self, RecordError> {
        let label = record.timestamp.to_string();
        let payload = match kind {
            EventKind::ShotFired => {
                let shooter = record.alien_id.clone().ok_or_else(|| RecordError::MissingField {
                    id: label.clone(),
                    field: "alienId",
                })?;
                let field = |value: Option<f32>, name: &'static str| {
                    value.ok_or_else(|| RecordError::MissingField { id: label.clone(), field: name })
                };
                let origin = Vec2::new(field(record.x, "x")?, field(record.y, "y")?);
                let angle = field(record.angle, "angle")?;
                if !origin.is_finite() || !angle.is_finite() {
                    return Err(RecordError::NonFinite(label));
                }
                EventPayload::ShotFired { shooter, origin, angle }
            }
            EventKind::Kill => {
                let target = record.target_id.clone().ok_or_else(|| RecordError::MissingField {
                    id: label,
                    field: "targetId",
                })?;
                EventPayload::Kill { target }
            }
        };
        Ok(Self {
            source: source.clone(),
            timestamp: record.timestamp,
            payload,
        })
    }
}

/// Encode an event ring.
pub fn encode_events<'a, I>(records: I) -> Result<Value, RecordError>
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let records: Vec<&EventRecord> = records.into_iter().collect();
    Ok(serde_json::to_value(records)?)
}

/// Decode an event ring entry by entry.
pub fn decode_events(value: &Value) -> Result<Vec<Result<EventRecord, RecordError>>, RecordError> {
    let entries = value.as_array().ok_or(RecordError::NotAnArray)?;
    Ok(entries
        .iter()
        .map(|raw| EventRecord::deserialize(raw).map_err(RecordError::from))
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================
