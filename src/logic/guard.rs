//! Referential-integrity gate for destructive mutations.
//!
//! Which collections block the deletion of which entity kind is one
//! declarative table, not per-route checks. Nothing cascades: a registry
//! exists for provenance, and a cascade would silently destroy it. The
//! caller removes dependents explicitly, then deletes.

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::model::{EntityKind, Id};
use crate::store::Store;

/// Names of the dependent collections the guard probes. These are the
/// names surfaced in `HasDependents` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionName {
    Locations,
    LandParcels,
    Persons,
    Users,
    MeasurementEquipment,
    LocationJournal,
    PersonJournal,
    UsageHistory,
    HydrologicalHistory,
    SoilHistory,
    VegetationHistory,
    AffiliationHistory,
    RoleAssignments,
    ParcelLinks,
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The fixed dependency table: which collections can hold a reference to
/// an entity of the given kind.
pub fn dependent_collections(kind: EntityKind) -> &'static [CollectionName] {
    use CollectionName::*;
    match kind {
        EntityKind::Cluster => &[Locations],
        EntityKind::Location => &[
            MeasurementEquipment,
            LocationJournal,
            PersonJournal,
            UsageHistory,
            HydrologicalHistory,
            SoilHistory,
            VegetationHistory,
            RoleAssignments,
            ParcelLinks,
        ],
        EntityKind::Person => &[
            LandParcels,
            AffiliationHistory,
            PersonJournal,
            LocationJournal,
            RoleAssignments,
            Users,
        ],
        EntityKind::Institution => &[Persons, AffiliationHistory],
        EntityKind::LandParcel => &[ParcelLinks],
        EntityKind::UsageType => &[UsageHistory],
        EntityKind::HydrologicalSituation => &[HydrologicalHistory],
        EntityKind::SoilType => &[SoilHistory],
        EntityKind::VegetationType => &[VegetationHistory],
        EntityKind::Role => &[RoleAssignments],
        // leaf records: nothing references them
        EntityKind::MeasurementEquipment
        | EntityKind::User
        | EntityKind::HistoryEntry
        | EntityKind::RoleAssignment
        | EntityKind::JournalEntry => &[],
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteCheck {
    pub allowed: bool,
    pub blocking_collections: Vec<CollectionName>,
}

/// Probe every dependent collection for records referencing `id`.
/// Advisory only: the answer can go stale the moment the probes return, so
/// deletion itself never relies on it.
pub async fn can_delete<S: Store + ?Sized>(
    store: &S,
    kind: EntityKind,
    id: &Id,
) -> Result<DeleteCheck, RegistryError> {
    let mut blocking_collections = Vec::new();
    for &collection in dependent_collections(kind) {
        if store.count_referencing(collection, id).await? > 0 {
            blocking_collections.push(collection);
        }
    }
    Ok(DeleteCheck {
        allowed: blocking_collections.is_empty(),
        blocking_collections,
    })
}

/// The only deletion path for guarded records. Each backend runs the
/// existence check, the dependency probes against `dependent_collections`,
/// and the removal as one atomic unit of work, so nothing can append a
/// dependent between the probe and the removal. Fails with `HasDependents`
/// naming every non-empty collection; never removes anything in that case.
pub async fn checked_delete<S: Store + ?Sized>(
    store: &S,
    kind: EntityKind,
    id: &Id,
) -> Result<(), RegistryError> {
    store.delete_entity(kind, id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_dependency_table_is_complete() {
        let deps = dependent_collections(EntityKind::Location);
        for needed in [
            CollectionName::MeasurementEquipment,
            CollectionName::LocationJournal,
            CollectionName::UsageHistory,
            CollectionName::HydrologicalHistory,
            CollectionName::SoilHistory,
            CollectionName::VegetationHistory,
            CollectionName::RoleAssignments,
            CollectionName::ParcelLinks,
        ] {
            assert!(deps.contains(&needed), "{} missing", needed);
        }
    }

    #[test]
    fn leaf_kinds_have_no_dependents() {
        assert!(dependent_collections(EntityKind::MeasurementEquipment).is_empty());
        assert!(dependent_collections(EntityKind::HistoryEntry).is_empty());
        assert!(dependent_collections(EntityKind::JournalEntry).is_empty());
    }
}
