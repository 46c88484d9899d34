use std::collections::HashMap;

use chrono::NaiveDate;
use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::logic::{dependent_collections, ledger, CollectionName};
use crate::model::{
    Cluster, EntityKind, HistoryCategory, HistoryEntry, Id, Institution, JournalEntry,
    JournalKind, LandParcel, Location, LookupKind, LookupValue, MeasurementEquipment,
    NewCluster, NewHistoryEntry, NewInstitution, NewJournalEntry, NewLandParcel, NewLocation,
    NewLookupValue, NewMeasurementEquipment, NewPerson, NewRoleAssignment, NewUser, ParcelLink,
    Person, RoleAssignment, User,
};
use crate::store::traits::{
    ClusterStore, EquipmentStore, HistoryStore, InstitutionStore, JournalStore, LocationStore,
    LookupStore, ParcelStore, PersonStore, ProbeStore, RoleAssignmentStore, Store, UserStore,
};

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Default)]
struct Registry {
    clusters: HashMap<Id, Cluster>,
    locations: HashMap<Id, Location>,
    parcels: HashMap<Id, LandParcel>,
    persons: HashMap<Id, Person>,
    institutions: HashMap<Id, Institution>,
    users: HashMap<Id, User>,
    equipment: HashMap<Id, MeasurementEquipment>,
    lookups: HashMap<LookupKind, HashMap<Id, LookupValue>>,
    history: HashMap<Id, HistoryEntry>,
    role_assignments: HashMap<Id, RoleAssignment>,
    journal: HashMap<Id, JournalEntry>,
    parcel_links: Vec<ParcelLink>,
}

/// In-process registry backend. One lock guards the whole registry, so
/// every operation, including the ledger's check-then-insert sequence, is
/// a single atomic unit of work.
pub struct MemoryStore {
    inner: RwLock<Registry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        for kind in LookupKind::ALL {
            registry.lookups.insert(kind, HashMap::new());
        }
        Self {
            inner: RwLock::new(registry),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    fn lookup_table(&self, kind: LookupKind) -> &HashMap<Id, LookupValue> {
        self.lookups.get(&kind).expect("all lookup tables exist")
    }

    fn lookup_table_mut(&mut self, kind: LookupKind) -> &mut HashMap<Id, LookupValue> {
        self.lookups.get_mut(&kind).expect("all lookup tables exist")
    }

    fn ensure_ref(
        &self,
        field: &'static str,
        kind: EntityKind,
        id: Option<&Id>,
    ) -> Result<()> {
        let Some(id) = id else { return Ok(()) };
        if self.contains(kind, id) {
            return Ok(());
        }
        Err(RegistryError::DanglingReference {
            field,
            kind,
            id: id.clone(),
        })
    }

    fn contains(&self, kind: EntityKind, id: &Id) -> bool {
        match kind {
            EntityKind::Cluster => self.clusters.contains_key(id),
            EntityKind::Location => self.locations.contains_key(id),
            EntityKind::LandParcel => self.parcels.contains_key(id),
            EntityKind::Person => self.persons.contains_key(id),
            EntityKind::Institution => self.institutions.contains_key(id),
            EntityKind::MeasurementEquipment => self.equipment.contains_key(id),
            EntityKind::User => self.users.contains_key(id),
            EntityKind::UsageType => self.lookup_table(LookupKind::UsageTypes).contains_key(id),
            EntityKind::HydrologicalSituation => self
                .lookup_table(LookupKind::HydrologicalSituations)
                .contains_key(id),
            EntityKind::SoilType => self.lookup_table(LookupKind::SoilTypes).contains_key(id),
            EntityKind::VegetationType => self
                .lookup_table(LookupKind::VegetationTypes)
                .contains_key(id),
            EntityKind::Role => self.lookup_table(LookupKind::Roles).contains_key(id),
            EntityKind::HistoryEntry => self.history.contains_key(id),
            EntityKind::RoleAssignment => self.role_assignments.contains_key(id),
            EntityKind::JournalEntry => self.journal.contains_key(id),
        }
    }

    fn history_for(&self, category: HistoryCategory, subject_id: &Id) -> Vec<HistoryEntry> {
        let entries = self
            .history
            .values()
            .filter(|e| e.category == category && &e.subject_id == subject_id)
            .cloned()
            .collect();
        ledger::sorted_by_start(entries)
    }

    fn assignments_for_pair(&self, person_id: &Id, location_id: &Id) -> Vec<RoleAssignment> {
        self.role_assignments
            .values()
            .filter(|a| &a.person_id == person_id && &a.location_id == location_id)
            .cloned()
            .collect()
    }

    fn count_referencing(&self, collection: CollectionName, id: &Id) -> usize {
        match collection {
            CollectionName::Locations => self
                .locations
                .values()
                .filter(|l| l.cluster_id.as_ref() == Some(id))
                .count(),
            CollectionName::LandParcels => self
                .parcels
                .values()
                .filter(|p| p.owner_id.as_ref() == Some(id))
                .count(),
            CollectionName::Persons => self
                .persons
                .values()
                .filter(|p| p.institution_id.as_ref() == Some(id))
                .count(),
            CollectionName::Users => self
                .users
                .values()
                .filter(|u| u.person_id.as_ref() == Some(id))
                .count(),
            CollectionName::MeasurementEquipment => self
                .equipment
                .values()
                .filter(|e| e.location_id.as_ref() == Some(id))
                .count(),
            CollectionName::LocationJournal => count_journal(self, JournalKind::Location, id),
            CollectionName::PersonJournal => count_journal(self, JournalKind::Person, id),
            CollectionName::UsageHistory => count_history(self, HistoryCategory::Usage, id),
            CollectionName::HydrologicalHistory => {
                count_history(self, HistoryCategory::Hydrological, id)
            }
            CollectionName::SoilHistory => count_history(self, HistoryCategory::Soil, id),
            CollectionName::VegetationHistory => {
                count_history(self, HistoryCategory::Vegetation, id)
            }
            CollectionName::AffiliationHistory => {
                count_history(self, HistoryCategory::Affiliation, id)
            }
            CollectionName::RoleAssignments => self
                .role_assignments
                .values()
                .filter(|a| &a.person_id == id || &a.location_id == id || &a.role_id == id)
                .count(),
            CollectionName::ParcelLinks => self
                .parcel_links
                .iter()
                .filter(|l| &l.location_id == id || &l.land_parcel_id == id)
                .count(),
        }
    }

    fn remove(&mut self, kind: EntityKind, id: &Id) -> Result<bool> {
        let removed = match kind {
            EntityKind::Cluster => self.clusters.remove(id).is_some(),
            EntityKind::Location => self.locations.remove(id).is_some(),
            EntityKind::LandParcel => self.parcels.remove(id).is_some(),
            EntityKind::Person => self.persons.remove(id).is_some(),
            EntityKind::Institution => self.institutions.remove(id).is_some(),
            EntityKind::MeasurementEquipment => self.equipment.remove(id).is_some(),
            EntityKind::User => self.users.remove(id).is_some(),
            EntityKind::UsageType => self
                .lookup_table_mut(LookupKind::UsageTypes)
                .remove(id)
                .is_some(),
            EntityKind::HydrologicalSituation => self
                .lookup_table_mut(LookupKind::HydrologicalSituations)
                .remove(id)
                .is_some(),
            EntityKind::SoilType => self
                .lookup_table_mut(LookupKind::SoilTypes)
                .remove(id)
                .is_some(),
            EntityKind::VegetationType => self
                .lookup_table_mut(LookupKind::VegetationTypes)
                .remove(id)
                .is_some(),
            EntityKind::Role => self.lookup_table_mut(LookupKind::Roles).remove(id).is_some(),
            EntityKind::HistoryEntry => self.history.remove(id).is_some(),
            EntityKind::RoleAssignment => self.role_assignments.remove(id).is_some(),
            EntityKind::JournalEntry => {
                return Err(RegistryError::validation(
                    "journal entries are append-only and cannot be removed",
                ))
            }
        };
        Ok(removed)
    }

    fn ensure_unique_user(&self, user: &User) -> Result<()> {
        for other in self.users.values() {
            if other.id == user.id {
                continue;
            }
            if other.username == user.username {
                return Err(RegistryError::validation(format!(
                    "username '{}' is already taken",
                    user.username
                )));
            }
            if other.email == user.email {
                return Err(RegistryError::validation(format!(
                    "email '{}' is already registered",
                    user.email
                )));
            }
        }
        Ok(())
    }
}

fn sorted_by_created<T>(
    values: impl Iterator<Item = T>,
    created: impl Fn(&T) -> chrono::DateTime<chrono::Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = values.collect();
    out.sort_by_key(created);
    out
}

#[async_trait::async_trait]
impl ClusterStore for MemoryStore {
    async fn create_cluster(&self, new: NewCluster) -> Result<Cluster> {
        let cluster = Cluster::create(new)?;
        let mut reg = self.inner.write();
        reg.clusters.insert(cluster.id.clone(), cluster.clone());
        Ok(cluster)
    }

    async fn get_cluster(&self, id: &Id) -> Result<Cluster> {
        self.inner
            .read()
            .clusters
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::Cluster, id.clone()))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(reg.clusters.values().cloned(), |c| {
            c.stamps.created_at
        }))
    }

    async fn update_cluster(&self, id: &Id, new: NewCluster) -> Result<Cluster> {
        let mut reg = self.inner.write();
        let cluster = reg
            .clusters
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::Cluster, id.clone()))?;
        cluster.apply(new)?;
        Ok(cluster.clone())
    }
}

#[async_trait::async_trait]
impl LocationStore for MemoryStore {
    async fn create_location(&self, new: NewLocation) -> Result<Location> {
        let location = Location::create(new)?;
        let mut reg = self.inner.write();
        reg.ensure_ref("cluster_id", EntityKind::Cluster, location.cluster_id.as_ref())?;
        reg.locations.insert(location.id.clone(), location.clone());
        Ok(location)
    }

    async fn get_location(&self, id: &Id) -> Result<Location> {
        self.inner
            .read()
            .locations
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::Location, id.clone()))
    }

    async fn list_locations(&self, cluster_id: Option<&Id>) -> Result<Vec<Location>> {
        let reg = self.inner.read();
        let filtered = reg
            .locations
            .values()
            .filter(|l| cluster_id.is_none() || l.cluster_id.as_ref() == cluster_id)
            .cloned();
        Ok(sorted_by_created(filtered, |l| l.stamps.created_at))
    }

    async fn update_location(&self, id: &Id, new: NewLocation) -> Result<Location> {
        let mut reg = self.inner.write();
        if !reg.locations.contains_key(id) {
            return Err(RegistryError::not_found(EntityKind::Location, id.clone()));
        }
        reg.ensure_ref("cluster_id", EntityKind::Cluster, new.cluster_id.as_ref())?;
        let location = reg.locations.get_mut(id).expect("checked above");
        location.apply(new)?;
        Ok(location.clone())
    }
}

#[async_trait::async_trait]
impl ParcelStore for MemoryStore {
    async fn create_parcel(&self, new: NewLandParcel) -> Result<LandParcel> {
        let parcel = LandParcel::create(new)?;
        let mut reg = self.inner.write();
        reg.ensure_ref("owner_id", EntityKind::Person, parcel.owner_id.as_ref())?;
        reg.parcels.insert(parcel.id.clone(), parcel.clone());
        Ok(parcel)
    }

    async fn get_parcel(&self, id: &Id) -> Result<LandParcel> {
        self.inner
            .read()
            .parcels
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::LandParcel, id.clone()))
    }

    async fn list_parcels(&self) -> Result<Vec<LandParcel>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(reg.parcels.values().cloned(), |p| {
            p.stamps.created_at
        }))
    }

    async fn update_parcel(&self, id: &Id, new: NewLandParcel) -> Result<LandParcel> {
        let mut reg = self.inner.write();
        if !reg.parcels.contains_key(id) {
            return Err(RegistryError::not_found(EntityKind::LandParcel, id.clone()));
        }
        reg.ensure_ref("owner_id", EntityKind::Person, new.owner_id.as_ref())?;
        let parcel = reg.parcels.get_mut(id).expect("checked above");
        parcel.apply(new)?;
        Ok(parcel.clone())
    }

    async fn link_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<ParcelLink> {
        let mut reg = self.inner.write();
        if !reg.locations.contains_key(location_id) {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        reg.ensure_ref("land_parcel_id", EntityKind::LandParcel, Some(parcel_id))?;
        let already = reg
            .parcel_links
            .iter()
            .any(|l| &l.location_id == location_id && &l.land_parcel_id == parcel_id);
        if already {
            return Err(RegistryError::validation(
                "parcel is already linked to this location",
            ));
        }
        let link = ParcelLink::new(location_id.clone(), parcel_id.clone());
        reg.parcel_links.push(link.clone());
        Ok(link)
    }

    async fn unlink_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<()> {
        let mut reg = self.inner.write();
        let before = reg.parcel_links.len();
        reg.parcel_links
            .retain(|l| !(&l.location_id == location_id && &l.land_parcel_id == parcel_id));
        if reg.parcel_links.len() == before {
            return Err(RegistryError::validation(
                "parcel is not linked to this location",
            ));
        }
        Ok(())
    }

    async fn parcels_for_location(&self, location_id: &Id) -> Result<Vec<LandParcel>> {
        let reg = self.inner.read();
        if !reg.locations.contains_key(location_id) {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        let parcels = reg
            .parcel_links
            .iter()
            .filter(|l| &l.location_id == location_id)
            .filter_map(|l| reg.parcels.get(&l.land_parcel_id))
            .cloned();
        Ok(sorted_by_created(parcels, |p| p.stamps.created_at))
    }
}

#[async_trait::async_trait]
impl PersonStore for MemoryStore {
    async fn create_person(&self, new: NewPerson) -> Result<Person> {
        let person = Person::create(new)?;
        let mut reg = self.inner.write();
        reg.ensure_ref(
            "institution_id",
            EntityKind::Institution,
            person.institution_id.as_ref(),
        )?;
        reg.persons.insert(person.id.clone(), person.clone());
        Ok(person)
    }

    async fn get_person(&self, id: &Id) -> Result<Person> {
        self.inner
            .read()
            .persons
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::Person, id.clone()))
    }

    async fn list_persons(&self) -> Result<Vec<Person>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(reg.persons.values().cloned(), |p| {
            p.stamps.created_at
        }))
    }

    async fn update_person(&self, id: &Id, new: NewPerson) -> Result<Person> {
        let mut reg = self.inner.write();
        if !reg.persons.contains_key(id) {
            return Err(RegistryError::not_found(EntityKind::Person, id.clone()));
        }
        reg.ensure_ref(
            "institution_id",
            EntityKind::Institution,
            new.institution_id.as_ref(),
        )?;
        let person = reg.persons.get_mut(id).expect("checked above");
        person.apply(new)?;
        Ok(person.clone())
    }
}

#[async_trait::async_trait]
impl InstitutionStore for MemoryStore {
    async fn create_institution(&self, new: NewInstitution) -> Result<Institution> {
        let institution = Institution::create(new)?;
        let mut reg = self.inner.write();
        reg.institutions
            .insert(institution.id.clone(), institution.clone());
        Ok(institution)
    }

    async fn get_institution(&self, id: &Id) -> Result<Institution> {
        self.inner
            .read()
            .institutions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::Institution, id.clone()))
    }

    async fn list_institutions(&self) -> Result<Vec<Institution>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(reg.institutions.values().cloned(), |i| {
            i.stamps.created_at
        }))
    }

    async fn update_institution(&self, id: &Id, new: NewInstitution) -> Result<Institution> {
        let mut reg = self.inner.write();
        let institution = reg
            .institutions
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::Institution, id.clone()))?;
        institution.apply(new)?;
        Ok(institution.clone())
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let user = User::create(new)?;
        let mut reg = self.inner.write();
        reg.ensure_ref("person_id", EntityKind::Person, user.person_id.as_ref())?;
        reg.ensure_unique_user(&user)?;
        reg.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &Id) -> Result<User> {
        self.inner
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::User, id.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(reg.users.values().cloned(), |u| {
            u.stamps.created_at
        }))
    }

    async fn update_user(&self, id: &Id, new: NewUser) -> Result<User> {
        let mut reg = self.inner.write();
        if !reg.users.contains_key(id) {
            return Err(RegistryError::not_found(EntityKind::User, id.clone()));
        }
        reg.ensure_ref("person_id", EntityKind::Person, new.person_id.as_ref())?;
        let mut updated = reg.users.get(id).expect("checked above").clone();
        updated.apply(new)?;
        reg.ensure_unique_user(&updated)?;
        reg.users.insert(id.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl EquipmentStore for MemoryStore {
    async fn create_equipment(
        &self,
        new: NewMeasurementEquipment,
    ) -> Result<MeasurementEquipment> {
        let equipment = MeasurementEquipment::create(new)?;
        let mut reg = self.inner.write();
        reg.ensure_ref(
            "location_id",
            EntityKind::Location,
            equipment.location_id.as_ref(),
        )?;
        reg.equipment.insert(equipment.id.clone(), equipment.clone());
        Ok(equipment)
    }

    async fn get_equipment(&self, id: &Id) -> Result<MeasurementEquipment> {
        self.inner
            .read()
            .equipment
            .get(id)
            .cloned()
            .ok_or_else(|| {
                RegistryError::not_found(EntityKind::MeasurementEquipment, id.clone())
            })
    }

    async fn list_equipment(
        &self,
        location_id: Option<&Id>,
    ) -> Result<Vec<MeasurementEquipment>> {
        let reg = self.inner.read();
        let filtered = reg
            .equipment
            .values()
            .filter(|e| location_id.is_none() || e.location_id.as_ref() == location_id)
            .cloned();
        Ok(sorted_by_created(filtered, |e| e.stamps.created_at))
    }

    async fn update_equipment(
        &self,
        id: &Id,
        new: NewMeasurementEquipment,
    ) -> Result<MeasurementEquipment> {
        let mut reg = self.inner.write();
        if !reg.equipment.contains_key(id) {
            return Err(RegistryError::not_found(
                EntityKind::MeasurementEquipment,
                id.clone(),
            ));
        }
        reg.ensure_ref("location_id", EntityKind::Location, new.location_id.as_ref())?;
        let equipment = reg.equipment.get_mut(id).expect("checked above");
        equipment.apply(new)?;
        Ok(equipment.clone())
    }
}

#[async_trait::async_trait]
impl LookupStore for MemoryStore {
    async fn create_lookup(&self, kind: LookupKind, new: NewLookupValue) -> Result<LookupValue> {
        let value = LookupValue::create(new)?;
        let mut reg = self.inner.write();
        reg.lookup_table_mut(kind).insert(value.id.clone(), value.clone());
        Ok(value)
    }

    async fn get_lookup(&self, kind: LookupKind, id: &Id) -> Result<LookupValue> {
        self.inner
            .read()
            .lookup_table(kind)
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(kind.entity_kind(), id.clone()))
    }

    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<LookupValue>> {
        let reg = self.inner.read();
        Ok(sorted_by_created(
            reg.lookup_table(kind).values().cloned(),
            |v| v.stamps.created_at,
        ))
    }

    async fn update_lookup(
        &self,
        kind: LookupKind,
        id: &Id,
        new: NewLookupValue,
    ) -> Result<LookupValue> {
        let mut reg = self.inner.write();
        let value = reg
            .lookup_table_mut(kind)
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(kind.entity_kind(), id.clone()))?;
        value.apply(new)?;
        Ok(value.clone())
    }
}

#[async_trait::async_trait]
impl HistoryStore for MemoryStore {
    async fn append_history(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
        new: NewHistoryEntry,
    ) -> Result<HistoryEntry> {
        // The whole check-then-insert sequence runs under one write lock.
        let mut reg = self.inner.write();
        if !reg.contains(category.subject_kind(), subject_id) {
            return Err(RegistryError::not_found(
                category.subject_kind(),
                subject_id.clone(),
            ));
        }
        reg.ensure_ref(
            "classification_id",
            category.classification_kind(),
            Some(&new.classification_id),
        )?;
        let existing = reg.history_for(category, subject_id);
        ledger::ensure_appendable(&existing, new.start_date, new.end_date)?;
        let entry = HistoryEntry::new(category, subject_id.clone(), new);
        reg.history.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn history(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
    ) -> Result<Vec<HistoryEntry>> {
        let reg = self.inner.read();
        if !reg.contains(category.subject_kind(), subject_id) {
            return Err(RegistryError::not_found(
                category.subject_kind(),
                subject_id.clone(),
            ));
        }
        Ok(reg.history_for(category, subject_id))
    }

    async fn current_entry(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
    ) -> Result<Option<HistoryEntry>> {
        let entries = self.history(category, subject_id).await?;
        Ok(ledger::current(&entries).cloned())
    }

    async fn get_history_entry(&self, id: &Id) -> Result<HistoryEntry> {
        self.inner
            .read()
            .history
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::HistoryEntry, id.clone()))
    }

    async fn close_history_entry(&self, id: &Id, end_date: NaiveDate) -> Result<HistoryEntry> {
        let mut reg = self.inner.write();
        let entry = reg
            .history
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::HistoryEntry, id.clone()))?;
        if entry.end_date.is_some() {
            return Err(RegistryError::validation("history entry is already closed"));
        }
        // Closing shrinks an open range, which cannot introduce overlaps;
        // only the range itself needs re-validation.
        ledger::validate_span(entry.start_date, Some(end_date))?;
        entry.end_date = Some(end_date);
        entry.stamps.touch();
        Ok(entry.clone())
    }
}

#[async_trait::async_trait]
impl RoleAssignmentStore for MemoryStore {
    async fn append_role_assignment(&self, new: NewRoleAssignment) -> Result<RoleAssignment> {
        let mut reg = self.inner.write();
        reg.ensure_ref("person_id", EntityKind::Person, Some(&new.person_id))?;
        reg.ensure_ref("location_id", EntityKind::Location, Some(&new.location_id))?;
        reg.ensure_ref("role_id", EntityKind::Role, Some(&new.role_id))?;
        let existing = reg.assignments_for_pair(&new.person_id, &new.location_id);
        ledger::ensure_appendable(&existing, new.start_date, new.end_date)?;
        let assignment = RoleAssignment::new(new);
        reg.role_assignments
            .insert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    async fn role_assignments_for_location(
        &self,
        location_id: &Id,
    ) -> Result<Vec<RoleAssignment>> {
        let reg = self.inner.read();
        if !reg.locations.contains_key(location_id) {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        let assignments = reg
            .role_assignments
            .values()
            .filter(|a| &a.location_id == location_id)
            .cloned()
            .collect();
        Ok(ledger::sorted_by_start(assignments))
    }

    async fn role_assignments_for_person(&self, person_id: &Id) -> Result<Vec<RoleAssignment>> {
        let reg = self.inner.read();
        if !reg.persons.contains_key(person_id) {
            return Err(RegistryError::not_found(
                EntityKind::Person,
                person_id.clone(),
            ));
        }
        let assignments = reg
            .role_assignments
            .values()
            .filter(|a| &a.person_id == person_id)
            .cloned()
            .collect();
        Ok(ledger::sorted_by_start(assignments))
    }

    async fn get_role_assignment(&self, id: &Id) -> Result<RoleAssignment> {
        self.inner
            .read()
            .role_assignments
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(EntityKind::RoleAssignment, id.clone()))
    }

    async fn close_role_assignment(&self, id: &Id, end_date: NaiveDate) -> Result<RoleAssignment> {
        let mut reg = self.inner.write();
        let assignment = reg
            .role_assignments
            .get_mut(id)
            .ok_or_else(|| RegistryError::not_found(EntityKind::RoleAssignment, id.clone()))?;
        if assignment.end_date.is_some() {
            return Err(RegistryError::validation("role assignment is already closed"));
        }
        ledger::validate_span(assignment.start_date, Some(end_date))?;
        assignment.end_date = Some(end_date);
        assignment.stamps.touch();
        Ok(assignment.clone())
    }
}

#[async_trait::async_trait]
impl JournalStore for MemoryStore {
    async fn append_journal(
        &self,
        kind: JournalKind,
        subject_id: &Id,
        new: NewJournalEntry,
    ) -> Result<JournalEntry> {
        let mut reg = self.inner.write();
        let (subject_kind, related_kind, related_field) = match kind {
            JournalKind::Location => (EntityKind::Location, EntityKind::Person, "person_id"),
            JournalKind::Person => (EntityKind::Person, EntityKind::Location, "location_id"),
        };
        if !reg.contains(subject_kind, subject_id) {
            return Err(RegistryError::not_found(subject_kind, subject_id.clone()));
        }
        reg.ensure_ref(related_field, related_kind, new.related_id.as_ref())?;
        let entry = JournalEntry::new(kind, subject_id.clone(), new);
        reg.journal.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn journal_for(&self, kind: JournalKind, subject_id: &Id) -> Result<Vec<JournalEntry>> {
        let reg = self.inner.read();
        let subject_kind = match kind {
            JournalKind::Location => EntityKind::Location,
            JournalKind::Person => EntityKind::Person,
        };
        if !reg.contains(subject_kind, subject_id) {
            return Err(RegistryError::not_found(subject_kind, subject_id.clone()));
        }
        let mut entries: Vec<JournalEntry> = reg
            .journal
            .values()
            .filter(|e| e.kind == kind && &e.subject_id == subject_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.action_date);
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl ProbeStore for MemoryStore {
    async fn count_referencing(&self, collection: CollectionName, id: &Id) -> Result<u64> {
        Ok(self.inner.read().count_referencing(collection, id) as u64)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &Id) -> Result<()> {
        // Existence check, dependency probes and removal all happen under
        // the same write lock, so no append can land in between.
        let mut reg = self.inner.write();
        if !reg.contains(kind, id) {
            return Err(RegistryError::not_found(kind, id.clone()));
        }
        let blocking: Vec<CollectionName> = dependent_collections(kind)
            .iter()
            .copied()
            .filter(|&collection| reg.count_referencing(collection, id) > 0)
            .collect();
        if !blocking.is_empty() {
            return Err(RegistryError::HasDependents {
                kind,
                id: id.clone(),
                collections: blocking,
            });
        }
        reg.remove(kind, id)?;
        Ok(())
    }
}

fn count_journal(reg: &Registry, kind: JournalKind, id: &Id) -> usize {
    reg.journal
        .values()
        .filter(|e| {
            e.kind == kind && (&e.subject_id == id || e.related_id.as_ref() == Some(id))
        })
        .count()
}

fn count_history(reg: &Registry, category: HistoryCategory, id: &Id) -> usize {
    reg.history
        .values()
        .filter(|e| {
            e.category == category && (&e.subject_id == id || &e.classification_id == id)
        })
        .count()
}

impl Store for MemoryStore {}
