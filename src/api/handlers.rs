use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::logic::guard;
use crate::model::{
    Cluster, EntityKind, HistoryCategory, HistoryEntry, Id, Institution, JournalEntry,
    JournalKind, LandParcel, Location, LookupKind, LookupValue, MeasurementEquipment, NewCluster,
    NewHistoryEntry, NewInstitution, NewJournalEntry, NewLandParcel, NewLocation, NewLookupValue,
    NewMeasurementEquipment, NewPerson, NewRoleAssignment, NewUser, ParcelLink, Person,
    RoleAssignment, Stamps, User,
};
use crate::store::traits::*;

type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "moor-registry",
    })
}

/// Uniform body for successful deletes.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

fn deleted(kind: EntityKind, id: &Id) -> Json<DeleteResponse> {
    Json(DeleteResponse {
        success: true,
        message: format!("{} '{}' deleted", kind, id),
    })
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub end_date: NaiveDate,
}

// ---------------------------------------------------------------------------
// Clusters

pub async fn create_cluster<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewCluster>,
) -> Result<(StatusCode, Json<Cluster>)> {
    Ok((StatusCode::CREATED, Json(store.create_cluster(new).await?)))
}

pub async fn get_cluster<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Cluster>> {
    Ok(Json(store.get_cluster(&id).await?))
}

pub async fn list_clusters<S: Store>(State(store): State<Arc<S>>) -> Result<Json<Vec<Cluster>>> {
    Ok(Json(store.list_clusters().await?))
}

pub async fn update_cluster<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewCluster>,
) -> Result<Json<Cluster>> {
    Ok(Json(store.update_cluster(&id, new).await?))
}

pub async fn delete_cluster<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::Cluster, &id).await?;
    Ok(deleted(EntityKind::Cluster, &id))
}

pub async fn cluster_locations<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<LocationRead>>> {
    // 404s on an unknown cluster rather than returning an empty list
    let cluster = store.get_cluster(&id).await?;
    let locations = store.list_locations(Some(&id)).await?;
    Ok(Json(
        locations
            .into_iter()
            .map(|location| LocationRead::new(location, Some(cluster.name.clone())))
            .collect(),
    ))
}

// ---------------------------------------------------------------------------
// Locations

/// Location plus the resolved cluster name, the shape list views render.
/// Geometry is rendered to a WKT string under `coordinates_str`.
#[derive(Debug, Serialize)]
pub struct LocationRead {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub coordinates_str: Option<String>,
    pub cluster_id: Option<Id>,
    pub cluster_name: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

impl LocationRead {
    fn new(location: Location, cluster_name: Option<String>) -> Self {
        Self {
            id: location.id,
            name: location.name,
            description: location.description,
            coordinates_str: location.coordinates.as_ref().map(|g| g.to_wkt()),
            cluster_id: location.cluster_id,
            cluster_name,
            stamps: location.stamps,
        }
    }
}

async fn resolve_location<S: Store>(store: &S, location: Location) -> Result<LocationRead> {
    let cluster_name = match &location.cluster_id {
        Some(cluster_id) => Some(store.get_cluster(cluster_id).await?.name),
        None => None,
    };
    Ok(LocationRead::new(location, cluster_name))
}

#[derive(Debug, Deserialize)]
pub struct LocationFilter {
    pub cluster_id: Option<Id>,
}

pub async fn create_location<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewLocation>,
) -> Result<(StatusCode, Json<Location>)> {
    Ok((StatusCode::CREATED, Json(store.create_location(new).await?)))
}

pub async fn get_location<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<LocationRead>> {
    let location = store.get_location(&id).await?;
    Ok(Json(resolve_location(&*store, location).await?))
}

pub async fn list_locations<S: Store>(
    State(store): State<Arc<S>>,
    Query(filter): Query<LocationFilter>,
) -> Result<Json<Vec<LocationRead>>> {
    let locations = store.list_locations(filter.cluster_id.as_ref()).await?;
    let mut out = Vec::with_capacity(locations.len());
    for location in locations {
        out.push(resolve_location(&*store, location).await?);
    }
    Ok(Json(out))
}

pub async fn update_location<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewLocation>,
) -> Result<Json<Location>> {
    Ok(Json(store.update_location(&id, new).await?))
}

pub async fn delete_location<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::Location, &id).await?;
    Ok(deleted(EntityKind::Location, &id))
}

// ---------------------------------------------------------------------------
// Location history ledgers

fn location_category(category: HistoryCategory) -> Result<HistoryCategory> {
    if category.subject_kind() != EntityKind::Location {
        return Err(RegistryError::validation(
            "this endpoint serves location history categories only",
        ));
    }
    Ok(category)
}

pub async fn append_location_history<S: Store>(
    State(store): State<Arc<S>>,
    Path((id, category)): Path<(Id, HistoryCategory)>,
    Json(new): Json<NewHistoryEntry>,
) -> Result<(StatusCode, Json<HistoryEntry>)> {
    let category = location_category(category)?;
    let entry = store.append_history(category, &id, new).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn location_history<S: Store>(
    State(store): State<Arc<S>>,
    Path((id, category)): Path<(Id, HistoryCategory)>,
) -> Result<Json<Vec<HistoryEntry>>> {
    let category = location_category(category)?;
    Ok(Json(store.history(category, &id).await?))
}

pub async fn current_location_history<S: Store>(
    State(store): State<Arc<S>>,
    Path((id, category)): Path<(Id, HistoryCategory)>,
) -> Result<Json<Option<HistoryEntry>>> {
    let category = location_category(category)?;
    Ok(Json(store.current_entry(category, &id).await?))
}

pub async fn get_history_entry<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<HistoryEntry>> {
    Ok(Json(store.get_history_entry(&id).await?))
}

pub async fn close_history_entry<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(body): Json<CloseRequest>,
) -> Result<Json<HistoryEntry>> {
    Ok(Json(store.close_history_entry(&id, body.end_date).await?))
}

pub async fn delete_history_entry<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::HistoryEntry, &id).await?;
    Ok(deleted(EntityKind::HistoryEntry, &id))
}

// ---------------------------------------------------------------------------
// Person affiliation ledger

pub async fn append_affiliation<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewHistoryEntry>,
) -> Result<(StatusCode, Json<HistoryEntry>)> {
    let entry = store
        .append_history(HistoryCategory::Affiliation, &id, new)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn affiliation_history<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<HistoryEntry>>> {
    Ok(Json(store.history(HistoryCategory::Affiliation, &id).await?))
}

pub async fn current_affiliation<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Option<HistoryEntry>>> {
    Ok(Json(
        store.current_entry(HistoryCategory::Affiliation, &id).await?,
    ))
}

// ---------------------------------------------------------------------------
// Land parcels

pub async fn create_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewLandParcel>,
) -> Result<(StatusCode, Json<LandParcel>)> {
    Ok((StatusCode::CREATED, Json(store.create_parcel(new).await?)))
}

pub async fn get_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<LandParcel>> {
    Ok(Json(store.get_parcel(&id).await?))
}

pub async fn list_parcels<S: Store>(
    State(store): State<Arc<S>>,
) -> Result<Json<Vec<LandParcel>>> {
    Ok(Json(store.list_parcels().await?))
}

pub async fn update_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewLandParcel>,
) -> Result<Json<LandParcel>> {
    Ok(Json(store.update_parcel(&id, new).await?))
}

pub async fn delete_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::LandParcel, &id).await?;
    Ok(deleted(EntityKind::LandParcel, &id))
}

pub async fn link_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Path((id, parcel_id)): Path<(Id, Id)>,
) -> Result<(StatusCode, Json<ParcelLink>)> {
    let link = store.link_parcel(&id, &parcel_id).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn unlink_parcel<S: Store>(
    State(store): State<Arc<S>>,
    Path((id, parcel_id)): Path<(Id, Id)>,
) -> Result<Json<DeleteResponse>> {
    store.unlink_parcel(&id, &parcel_id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("parcel '{}' unlinked from location '{}'", parcel_id, id),
    }))
}

pub async fn location_parcels<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<LandParcel>>> {
    Ok(Json(store.parcels_for_location(&id).await?))
}

// ---------------------------------------------------------------------------
// Persons

/// Person plus the resolved current institution name.
#[derive(Debug, Serialize)]
pub struct PersonRead {
    #[serde(flatten)]
    pub person: Person,
    pub institution_name: Option<String>,
}

async fn resolve_person<S: Store>(store: &S, person: Person) -> Result<PersonRead> {
    let institution_name = match &person.institution_id {
        Some(institution_id) => Some(store.get_institution(institution_id).await?.name),
        None => None,
    };
    Ok(PersonRead {
        person,
        institution_name,
    })
}

pub async fn create_person<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewPerson>,
) -> Result<(StatusCode, Json<Person>)> {
    Ok((StatusCode::CREATED, Json(store.create_person(new).await?)))
}

pub async fn get_person<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<PersonRead>> {
    let person = store.get_person(&id).await?;
    Ok(Json(resolve_person(&*store, person).await?))
}

pub async fn list_persons<S: Store>(
    State(store): State<Arc<S>>,
) -> Result<Json<Vec<PersonRead>>> {
    let persons = store.list_persons().await?;
    let mut out = Vec::with_capacity(persons.len());
    for person in persons {
        out.push(resolve_person(&*store, person).await?);
    }
    Ok(Json(out))
}

pub async fn update_person<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewPerson>,
) -> Result<Json<Person>> {
    Ok(Json(store.update_person(&id, new).await?))
}

pub async fn delete_person<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::Person, &id).await?;
    Ok(deleted(EntityKind::Person, &id))
}

// ---------------------------------------------------------------------------
// Institutions

pub async fn create_institution<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewInstitution>,
) -> Result<(StatusCode, Json<Institution>)> {
    Ok((
        StatusCode::CREATED,
        Json(store.create_institution(new).await?),
    ))
}

pub async fn get_institution<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Institution>> {
    Ok(Json(store.get_institution(&id).await?))
}

pub async fn list_institutions<S: Store>(
    State(store): State<Arc<S>>,
) -> Result<Json<Vec<Institution>>> {
    Ok(Json(store.list_institutions().await?))
}

pub async fn update_institution<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewInstitution>,
) -> Result<Json<Institution>> {
    Ok(Json(store.update_institution(&id, new).await?))
}

pub async fn delete_institution<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::Institution, &id).await?;
    Ok(deleted(EntityKind::Institution, &id))
}

// ---------------------------------------------------------------------------
// Users

pub async fn create_user<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewUser>,
) -> Result<(StatusCode, Json<User>)> {
    Ok((StatusCode::CREATED, Json(store.create_user(new).await?)))
}

pub async fn get_user<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<User>> {
    Ok(Json(store.get_user(&id).await?))
}

pub async fn list_users<S: Store>(State(store): State<Arc<S>>) -> Result<Json<Vec<User>>> {
    Ok(Json(store.list_users().await?))
}

pub async fn update_user<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewUser>,
) -> Result<Json<User>> {
    Ok(Json(store.update_user(&id, new).await?))
}

pub async fn delete_user<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::User, &id).await?;
    Ok(deleted(EntityKind::User, &id))
}

// ---------------------------------------------------------------------------
// Measurement equipment

#[derive(Debug, Deserialize)]
pub struct EquipmentFilter {
    pub location_id: Option<Id>,
}

pub async fn create_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewMeasurementEquipment>,
) -> Result<(StatusCode, Json<MeasurementEquipment>)> {
    Ok((
        StatusCode::CREATED,
        Json(store.create_equipment(new).await?),
    ))
}

pub async fn get_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<MeasurementEquipment>> {
    Ok(Json(store.get_equipment(&id).await?))
}

pub async fn list_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Query(filter): Query<EquipmentFilter>,
) -> Result<Json<Vec<MeasurementEquipment>>> {
    Ok(Json(store.list_equipment(filter.location_id.as_ref()).await?))
}

pub async fn location_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<MeasurementEquipment>>> {
    store.get_location(&id).await?;
    Ok(Json(store.list_equipment(Some(&id)).await?))
}

pub async fn update_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewMeasurementEquipment>,
) -> Result<Json<MeasurementEquipment>> {
    Ok(Json(store.update_equipment(&id, new).await?))
}

pub async fn delete_equipment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::MeasurementEquipment, &id).await?;
    Ok(deleted(EntityKind::MeasurementEquipment, &id))
}

// ---------------------------------------------------------------------------
// Classification lookups

pub async fn create_lookup<S: Store>(
    State(store): State<Arc<S>>,
    Path(kind): Path<LookupKind>,
    Json(new): Json<NewLookupValue>,
) -> Result<(StatusCode, Json<LookupValue>)> {
    Ok((
        StatusCode::CREATED,
        Json(store.create_lookup(kind, new).await?),
    ))
}

pub async fn get_lookup<S: Store>(
    State(store): State<Arc<S>>,
    Path((kind, id)): Path<(LookupKind, Id)>,
) -> Result<Json<LookupValue>> {
    Ok(Json(store.get_lookup(kind, &id).await?))
}

pub async fn list_lookups<S: Store>(
    State(store): State<Arc<S>>,
    Path(kind): Path<LookupKind>,
) -> Result<Json<Vec<LookupValue>>> {
    Ok(Json(store.list_lookups(kind).await?))
}

pub async fn update_lookup<S: Store>(
    State(store): State<Arc<S>>,
    Path((kind, id)): Path<(LookupKind, Id)>,
    Json(new): Json<NewLookupValue>,
) -> Result<Json<LookupValue>> {
    Ok(Json(store.update_lookup(kind, &id, new).await?))
}

pub async fn delete_lookup<S: Store>(
    State(store): State<Arc<S>>,
    Path((kind, id)): Path<(LookupKind, Id)>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, kind.entity_kind(), &id).await?;
    Ok(deleted(kind.entity_kind(), &id))
}

// ---------------------------------------------------------------------------
// Role assignments

pub async fn append_role_assignment<S: Store>(
    State(store): State<Arc<S>>,
    Json(new): Json<NewRoleAssignment>,
) -> Result<(StatusCode, Json<RoleAssignment>)> {
    Ok((
        StatusCode::CREATED,
        Json(store.append_role_assignment(new).await?),
    ))
}

pub async fn get_role_assignment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<RoleAssignment>> {
    Ok(Json(store.get_role_assignment(&id).await?))
}

pub async fn close_role_assignment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(body): Json<CloseRequest>,
) -> Result<Json<RoleAssignment>> {
    Ok(Json(store.close_role_assignment(&id, body.end_date).await?))
}

pub async fn delete_role_assignment<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<DeleteResponse>> {
    guard::checked_delete(&*store, EntityKind::RoleAssignment, &id).await?;
    Ok(deleted(EntityKind::RoleAssignment, &id))
}

pub async fn location_role_assignments<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<RoleAssignment>>> {
    Ok(Json(store.role_assignments_for_location(&id).await?))
}

pub async fn person_role_assignments<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<RoleAssignment>>> {
    Ok(Json(store.role_assignments_for_person(&id).await?))
}

// ---------------------------------------------------------------------------
// Journals

pub async fn append_location_journal<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewJournalEntry>,
) -> Result<(StatusCode, Json<JournalEntry>)> {
    let entry = store.append_journal(JournalKind::Location, &id, new).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn location_journal<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<JournalEntry>>> {
    Ok(Json(store.journal_for(JournalKind::Location, &id).await?))
}

pub async fn append_person_journal<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
    Json(new): Json<NewJournalEntry>,
) -> Result<(StatusCode, Json<JournalEntry>)> {
    let entry = store.append_journal(JournalKind::Person, &id, new).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn person_journal<S: Store>(
    State(store): State<Arc<S>>,
    Path(id): Path<Id>,
) -> Result<Json<Vec<JournalEntry>>> {
    Ok(Json(store.journal_for(JournalKind::Person, &id).await?))
}
