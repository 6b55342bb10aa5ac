//! State Ingester
//!
//! Every frame, for every remote peer and every entity kind, reconciles the
//! shadow table against the owner's latest snapshot:
//!
//! ```text
//! incoming id, shadow exists   -> retarget + one smoothing step
//! incoming id, no shadow       -> spawn (unless dead or tombstoned)
//! known id missing from array  -> destroy
//! ```

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::network::protocol::{decode_snapshot, snapshot_key, RecordError, SnapshotEntry};
use crate::network::transport::{PeerId, SessionTransport};
use crate::sync::entity::{EntityKind, EntityTraits, ShadowEntity};
use crate::sync::events::RemovalReason;
use crate::sync::presenter::ShadowPresenter;
use crate::sync::registry::EntityRegistry;

/// What one ingest pass changed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    /// Shadows created.
    pub spawned: usize,
    /// Shadows retargeted.
    pub updated: usize,
    /// Shadows destroyed, with the reason.
    pub removed: Vec<(ShadowEntity, RemovalReason)>,
    /// Entries ignored this frame.
    pub skipped: usize,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.spawned += other.spawned;
        self.updated += other.updated;
        self.removed.extend(other.removed);
        self.skipped += other.skipped;
    }
}

/// Mirrors remote snapshots into the shadow table.
#[derive(Debug, Clone)]
pub struct StateIngester {
    alpha: f32,
}

impl StateIngester {
    /// Create an ingester smoothing with factor `alpha`.
    pub fn new(alpha: f32) -> Self {
        Self { alpha }
    }

    /// Smoothing factor.
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Reconcile every kind published by `owner`.
    pub fn ingest_peer(
        &self,
        transport: &dyn SessionTransport,
        owner: &PeerId,
        registry: &mut EntityRegistry,
        presenter: &mut dyn ShadowPresenter,
        frame: u64,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        for kind in EntityKind::ALL {
            let value = transport.peer_state(owner, &snapshot_key(kind));
            report.merge(self.reconcile(owner, kind, value.as_ref(), registry, presenter, frame));
        }
        report
    }

    /// Reconcile one `(owner, kind)` channel. `None` means the channel has
    /// never been written; existing shadows are kept.
    pub fn reconcile(
        &self,
        owner: &PeerId,
        kind: EntityKind,
        value: Option<&Value>,
        registry: &mut EntityRegistry,
        presenter: &mut dyn ShadowPresenter,
        frame: u64,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let Some(value) = value else {
            return report;
        };
        let entries = match decode_snapshot(value) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(peer = %owner.short(), %kind, error = %err, "unreadable snapshot, keeping shadows");
                return report;
            }
        };

        let mut known = registry.shadow_ids(owner, kind);

        for entry in entries {
            let record = match entry {
                SnapshotEntry::Valid(record) => record,
                SnapshotEntry::Invalid { id, error } => {
                    // Still present, just unusable this frame
                    if let Some(id) = id {
                        known.remove(&id);
                    }
                    debug!(peer = %owner.short(), %kind, %error, "skipping snapshot entry");
                    report.skipped += 1;
                    continue;
                }
            };

            if &record.owner_id != owner {
                let error = RecordError::OwnerMismatch {
                    id: record.id.to_string(),
                    claimed: record.owner_id.clone(),
                };
                warn!(peer = %owner.short(), %error, "ignoring foreign record");
                report.skipped += 1;
                continue;
            }
            if registry.is_owned(&record.id) {
                warn!(id = %record.id, "remote snapshot names a locally owned entity");
                report.skipped += 1;
                continue;
            }

            known.remove(&record.id);
            let traits = match EntityTraits::from_record(kind, &record) {
                Ok(traits) => traits,
                Err(error) => {
                    debug!(peer = %owner.short(), %kind, %error, "skipping snapshot entry");
                    report.skipped += 1;
                    continue;
                }
            };

            if traits.is_terminal() {
                if let Some(shadow) = registry.remove_shadow(&record.id) {
                    presenter.remove_shadow(&shadow.id, kind);
                    report.removed.push((shadow, RemovalReason::Terminal));
                }
                continue;
            }

            if let Some(shadow) = registry.shadow_mut(&record.id) {
                shadow.apply_record(&record, traits, self.alpha, frame);
                presenter.update_shadow(shadow);
                report.updated += 1;
            } else if registry.is_tombstoned(&record.id) {
                trace!(id = %record.id, "ignoring snapshot of killed entity");
            } else if registry.insert_shadow(ShadowEntity::from_record(&record, traits, frame)) {
                if let Some(shadow) = registry.shadow(&record.id) {
                    presenter.spawn_shadow(shadow);
                }
                report.spawned += 1;
            }
        }

        for id in known {
            if let Some(shadow) = registry.remove_shadow(&id) {
                presenter.remove_shadow(&id, kind);
                report.removed.push((shadow, RemovalReason::Absent));
            }
        }

        if report.spawned > 0 || !report.removed.is_empty() {
            debug!(
                peer = %owner.short(),
                %kind,
                spawned = report.spawned,
                removed = report.removed.len(),
                "reconciled shadows"
            );
        }
        report
    }
}

// =============================================================================
// TESTS
// =============================================================================
