use chrono::NaiveDate;

use crate::error::RegistryError;
use crate::logic::CollectionName;
use crate::model::{
    Cluster, EntityKind, HistoryCategory, HistoryEntry, Id, Institution, JournalEntry,
    JournalKind, LandParcel, Location, LookupKind, LookupValue, MeasurementEquipment,
    NewCluster, NewHistoryEntry, NewInstitution, NewJournalEntry, NewLandParcel, NewLocation,
    NewLookupValue, NewMeasurementEquipment, NewPerson, NewRoleAssignment, NewUser, ParcelLink,
    Person, RoleAssignment, User,
};

type Result<T> = std::result::Result<T, RegistryError>;

/// Every mutating operation below is one atomic unit of work against the
/// backing store; partial writes are never observable. `create_*` resolves
/// foreign keys (`DanglingReference` when a target is missing) and runs
/// required-field validation before anything lands.

#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create_cluster(&self, new: NewCluster) -> Result<Cluster>;
    async fn get_cluster(&self, id: &Id) -> Result<Cluster>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>>;
    async fn update_cluster(&self, id: &Id, new: NewCluster) -> Result<Cluster>;
}

#[async_trait::async_trait]
pub trait LocationStore: Send + Sync {
    async fn create_location(&self, new: NewLocation) -> Result<Location>;
    async fn get_location(&self, id: &Id) -> Result<Location>;
    /// Optionally filtered to one cluster.
    async fn list_locations(&self, cluster_id: Option<&Id>) -> Result<Vec<Location>>;
    async fn update_location(&self, id: &Id, new: NewLocation) -> Result<Location>;
}

#[async_trait::async_trait]
pub trait ParcelStore: Send + Sync {
    async fn create_parcel(&self, new: NewLandParcel) -> Result<LandParcel>;
    async fn get_parcel(&self, id: &Id) -> Result<LandParcel>;
    async fn list_parcels(&self) -> Result<Vec<LandParcel>>;
    async fn update_parcel(&self, id: &Id, new: NewLandParcel) -> Result<LandParcel>;
    /// Link a parcel to a location. The pair is unique; relinking an
    /// existing pair is a validation error.
    async fn link_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<ParcelLink>;
    async fn unlink_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<()>;
    async fn parcels_for_location(&self, location_id: &Id) -> Result<Vec<LandParcel>>;
}

#[async_trait::async_trait]
pub trait PersonStore: Send + Sync {
    async fn create_person(&self, new: NewPerson) -> Result<Person>;
    async fn get_person(&self, id: &Id) -> Result<Person>;
    async fn list_persons(&self) -> Result<Vec<Person>>;
    async fn update_person(&self, id: &Id, new: NewPerson) -> Result<Person>;
}

#[async_trait::async_trait]
pub trait InstitutionStore: Send + Sync {
    async fn create_institution(&self, new: NewInstitution) -> Result<Institution>;
    async fn get_institution(&self, id: &Id) -> Result<Institution>;
    async fn list_institutions(&self) -> Result<Vec<Institution>>;
    async fn update_institution(&self, id: &Id, new: NewInstitution) -> Result<Institution>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Enforces username and email uniqueness.
    async fn create_user(&self, new: NewUser) -> Result<User>;
    async fn get_user(&self, id: &Id) -> Result<User>;
    async fn list_users(&self) -> Result<Vec<User>>;
    async fn update_user(&self, id: &Id, new: NewUser) -> Result<User>;
}

#[async_trait::async_trait]
pub trait EquipmentStore: Send + Sync {
    async fn create_equipment(&self, new: NewMeasurementEquipment)
        -> Result<MeasurementEquipment>;
    async fn get_equipment(&self, id: &Id) -> Result<MeasurementEquipment>;
    async fn list_equipment(&self, location_id: Option<&Id>)
        -> Result<Vec<MeasurementEquipment>>;
    async fn update_equipment(
        &self,
        id: &Id,
        new: NewMeasurementEquipment,
    ) -> Result<MeasurementEquipment>;
}

#[async_trait::async_trait]
pub trait LookupStore: Send + Sync {
    async fn create_lookup(&self, kind: LookupKind, new: NewLookupValue) -> Result<LookupValue>;
    async fn get_lookup(&self, kind: LookupKind, id: &Id) -> Result<LookupValue>;
    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<LookupValue>>;
    async fn update_lookup(
        &self,
        kind: LookupKind,
        id: &Id,
        new: NewLookupValue,
    ) -> Result<LookupValue>;
}

/// The temporal ledger. Appends are check-then-insert sequences; each
/// backend makes them atomic (one write lock in memory, a transaction plus
/// a unique index in Postgres), so concurrent overlapping appends for the
/// same subject and category serialize and exactly one wins.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a history entry. Fails with `InvalidRange`, `OverlapViolation`,
    /// `NotFound` (subject) or `DanglingReference` (classification). Never
    /// touches the prior open entry; closing it is the caller's move.
    async fn append_history(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
        new: NewHistoryEntry,
    ) -> Result<HistoryEntry>;
    /// All entries for one subject and category, start date ascending.
    async fn history(&self, category: HistoryCategory, subject_id: &Id)
        -> Result<Vec<HistoryEntry>>;
    /// The open entry, if any. An explicitly closed history has no current
    /// classification.
    async fn current_entry(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
    ) -> Result<Option<HistoryEntry>>;
    async fn get_history_entry(&self, id: &Id) -> Result<HistoryEntry>;
    /// Set the end date of an open entry. Re-validates the range.
    async fn close_history_entry(&self, id: &Id, end_date: NaiveDate) -> Result<HistoryEntry>;
}

#[async_trait::async_trait]
pub trait RoleAssignmentStore: Send + Sync {
    /// Same ledger rules as history entries, keyed per (person, location).
    async fn append_role_assignment(&self, new: NewRoleAssignment) -> Result<RoleAssignment>;
    async fn role_assignments_for_location(&self, location_id: &Id)
        -> Result<Vec<RoleAssignment>>;
    async fn role_assignments_for_person(&self, person_id: &Id) -> Result<Vec<RoleAssignment>>;
    async fn get_role_assignment(&self, id: &Id) -> Result<RoleAssignment>;
    async fn close_role_assignment(&self, id: &Id, end_date: NaiveDate) -> Result<RoleAssignment>;
}

/// Journals are an audit trail: append and read only, no update or delete.
#[async_trait::async_trait]
pub trait JournalStore: Send + Sync {
    async fn append_journal(
        &self,
        kind: JournalKind,
        subject_id: &Id,
        new: NewJournalEntry,
    ) -> Result<JournalEntry>;
    /// Entries for one subject, action date ascending.
    async fn journal_for(&self, kind: JournalKind, subject_id: &Id) -> Result<Vec<JournalEntry>>;
}

/// Dependency probes plus the guarded removal primitive.
#[async_trait::async_trait]
pub trait ProbeStore: Send + Sync {
    /// How many records in `collection` reference `id` through any of
    /// their foreign-key fields. Advisory; `delete_entity` re-probes
    /// inside its own atomic section.
    async fn count_referencing(&self, collection: CollectionName, id: &Id) -> Result<u64>;
    /// Existence check, dependency probes and removal as one atomic unit
    /// of work (one write lock in memory, one transaction with the subject
    /// row locked in Postgres), so a concurrent append cannot land between
    /// the probe and the removal. Fails with `NotFound` or `HasDependents`;
    /// journal entries are append-only and never removable.
    async fn delete_entity(&self, kind: EntityKind, id: &Id) -> Result<()>;
}

pub trait Store:
    ClusterStore
    + LocationStore
    + ParcelStore
    + PersonStore
    + InstitutionStore
    + UserStore
    + EquipmentStore
    + LookupStore
    + HistoryStore
    + RoleAssignmentStore
    + JournalStore
    + ProbeStore
    + Send
    + Sync
{
}
