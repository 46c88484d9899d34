use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::RegistryError;
use crate::logic::{dependent_collections, ledger, CollectionName};
use crate::model::{
    Cluster, EntityKind, Geometry, HistoryCategory, HistoryEntry, Id, Institution, JournalEntry,
    JournalKind, LandParcel, Location, LookupKind, LookupValue, MeasurementEquipment,
    NewCluster, NewHistoryEntry, NewInstitution, NewJournalEntry, NewLandParcel, NewLocation,
    NewLookupValue, NewMeasurementEquipment, NewPerson, NewRoleAssignment, NewUser, ParcelLink,
    Person, RoleAssignment, Stamps, User,
};
use crate::store::traits::{
    ClusterStore, EquipmentStore, HistoryStore, InstitutionStore, JournalStore, LocationStore,
    LookupStore, ParcelStore, PersonStore, ProbeStore, RoleAssignmentStore, Store, UserStore,
};

type Result<T> = std::result::Result<T, RegistryError>;

/// PostgreSQL backend. Geometry columns use the native PostGIS types;
/// WKT is converted at the SQL boundary with ST_GeomFromText/ST_AsText.
/// Ledger appends run inside a transaction that locks the subject row,
/// with a unique (subject, start_date) index as defense in depth.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS clusters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS institutions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT,
    address TEXT,
    city TEXT,
    postal_code TEXT,
    country TEXT,
    phone TEXT,
    email TEXT,
    website TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS persons (
    id TEXT PRIMARY KEY,
    salutation TEXT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    address TEXT,
    city TEXT,
    postal_code TEXT,
    country TEXT,
    phone TEXT,
    email TEXT,
    iban TEXT,
    profession TEXT,
    institution_id TEXT REFERENCES institutions(id) ON DELETE RESTRICT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS locations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    coordinates GEOMETRY(POINT),
    cluster_id TEXT REFERENCES clusters(id) ON DELETE RESTRICT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS land_parcels (
    id TEXT PRIMARY KEY,
    parcel_number TEXT NOT NULL,
    area_size DOUBLE PRECISION,
    owner_id TEXT REFERENCES persons(id) ON DELETE RESTRICT,
    address TEXT,
    city TEXT,
    postal_code TEXT,
    country TEXT,
    coordinates GEOMETRY(POLYGON),
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS location_land_parcels (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    land_parcel_id TEXT NOT NULL REFERENCES land_parcels(id) ON DELETE RESTRICT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (location_id, land_parcel_id)
);

CREATE TABLE IF NOT EXISTS usage_types (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS hydrological_situations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS soil_types (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS vegetation_types (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS location_usage_history (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    usage_type_id TEXT NOT NULL REFERENCES usage_types(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (location_id, start_date)
);

CREATE TABLE IF NOT EXISTS location_hydrological_history (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    hydrological_situation_id TEXT NOT NULL REFERENCES hydrological_situations(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (location_id, start_date)
);

CREATE TABLE IF NOT EXISTS location_soil_history (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    soil_type_id TEXT NOT NULL REFERENCES soil_types(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (location_id, start_date)
);

CREATE TABLE IF NOT EXISTS location_vegetation_history (
    id TEXT PRIMARY KEY,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    vegetation_type_id TEXT NOT NULL REFERENCES vegetation_types(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (location_id, start_date)
);

CREATE TABLE IF NOT EXISTS person_institution_history (
    id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES persons(id) ON DELETE RESTRICT,
    institution_id TEXT NOT NULL REFERENCES institutions(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (person_id, start_date)
);

CREATE TABLE IF NOT EXISTS person_location_roles (
    id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES persons(id) ON DELETE RESTRICT,
    location_id TEXT NOT NULL REFERENCES locations(id) ON DELETE RESTRICT,
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE RESTRICT,
    start_date DATE NOT NULL,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (person_id, location_id, start_date)
);

CREATE TABLE IF NOT EXISTS measurement_equipment (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT,
    serial_number TEXT,
    manufacturer TEXT,
    installation_date DATE,
    location_id TEXT REFERENCES locations(id) ON DELETE RESTRICT,
    description TEXT,
    status TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS journal_entries (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    related_id TEXT,
    action_date DATE NOT NULL,
    action_type TEXT,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    person_id TEXT REFERENCES persons(id) ON DELETE RESTRICT,
    is_admin BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    last_login TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
"#;

/// (table, subject column, classification column) per history category.
fn history_table(category: HistoryCategory) -> (&'static str, &'static str, &'static str) {
    match category {
        HistoryCategory::Usage => ("location_usage_history", "location_id", "usage_type_id"),
        HistoryCategory::Hydrological => (
            "location_hydrological_history",
            "location_id",
            "hydrological_situation_id",
        ),
        HistoryCategory::Soil => ("location_soil_history", "location_id", "soil_type_id"),
        HistoryCategory::Vegetation => (
            "location_vegetation_history",
            "location_id",
            "vegetation_type_id",
        ),
        HistoryCategory::Affiliation => {
            ("person_institution_history", "person_id", "institution_id")
        }
    }
}

fn lookup_table(kind: LookupKind) -> &'static str {
    match kind {
        LookupKind::UsageTypes => "usage_types",
        LookupKind::HydrologicalSituations => "hydrological_situations",
        LookupKind::SoilTypes => "soil_types",
        LookupKind::VegetationTypes => "vegetation_types",
        LookupKind::Roles => "roles",
    }
}

fn stamps_from(row: &sqlx::postgres::PgRow) -> Stamps {
    Stamps {
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn geometry_from(row: &sqlx::postgres::PgRow) -> Result<Option<Geometry>> {
    let wkt: Option<String> = row.get("coordinates");
    wkt.as_deref().map(Geometry::from_wkt).transpose()
}

fn cluster_from(row: &sqlx::postgres::PgRow) -> Cluster {
    Cluster {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        stamps: stamps_from(row),
    }
}

fn location_from(row: &sqlx::postgres::PgRow) -> Result<Location> {
    Ok(Location {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        coordinates: geometry_from(row)?,
        cluster_id: row.get("cluster_id"),
        stamps: stamps_from(row),
    })
}

fn parcel_from(row: &sqlx::postgres::PgRow) -> Result<LandParcel> {
    Ok(LandParcel {
        id: row.get("id"),
        parcel_number: row.get("parcel_number"),
        area_size: row.get("area_size"),
        owner_id: row.get("owner_id"),
        address: row.get("address"),
        city: row.get("city"),
        postal_code: row.get("postal_code"),
        country: row.get("country"),
        coordinates: geometry_from(row)?,
        stamps: stamps_from(row),
    })
}

fn person_from(row: &sqlx::postgres::PgRow) -> Person {
    Person {
        id: row.get("id"),
        salutation: row.get("salutation"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        address: row.get("address"),
        city: row.get("city"),
        postal_code: row.get("postal_code"),
        country: row.get("country"),
        phone: row.get("phone"),
        email: row.get("email"),
        iban: row.get("iban"),
        profession: row.get("profession"),
        institution_id: row.get("institution_id"),
        stamps: stamps_from(row),
    }
}

fn institution_from(row: &sqlx::postgres::PgRow) -> Institution {
    Institution {
        id: row.get("id"),
        name: row.get("name"),
        kind: row.get("type"),
        address: row.get("address"),
        city: row.get("city"),
        postal_code: row.get("postal_code"),
        country: row.get("country"),
        phone: row.get("phone"),
        email: row.get("email"),
        website: row.get("website"),
        stamps: stamps_from(row),
    }
}

fn equipment_from(row: &sqlx::postgres::PgRow) -> MeasurementEquipment {
    MeasurementEquipment {
        id: row.get("id"),
        name: row.get("name"),
        kind: row.get("type"),
        serial_number: row.get("serial_number"),
        manufacturer: row.get("manufacturer"),
        installation_date: row.get("installation_date"),
        location_id: row.get("location_id"),
        description: row.get("description"),
        status: row.get("status"),
        stamps: stamps_from(row),
    }
}

fn user_from(row: &sqlx::postgres::PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        person_id: row.get("person_id"),
        is_admin: row.get("is_admin"),
        is_active: row.get("is_active"),
        last_login: row.get("last_login"),
        stamps: stamps_from(row),
    }
}

fn lookup_from(row: &sqlx::postgres::PgRow) -> LookupValue {
    LookupValue {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        stamps: stamps_from(row),
    }
}

fn history_from(category: HistoryCategory, row: &sqlx::postgres::PgRow) -> HistoryEntry {
    let (_, subject_col, class_col) = history_table(category);
    HistoryEntry {
        id: row.get("id"),
        category,
        subject_id: row.get(subject_col),
        classification_id: row.get(class_col),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        stamps: stamps_from(row),
    }
}

fn assignment_from(row: &sqlx::postgres::PgRow) -> RoleAssignment {
    RoleAssignment {
        id: row.get("id"),
        person_id: row.get("person_id"),
        location_id: row.get("location_id"),
        role_id: row.get("role_id"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        stamps: stamps_from(row),
    }
}

fn journal_from(kind: JournalKind, row: &sqlx::postgres::PgRow) -> JournalEntry {
    JournalEntry {
        id: row.get("id"),
        kind,
        subject_id: row.get("subject_id"),
        related_id: row.get("related_id"),
        action_date: row.get("action_date"),
        action_type: row.get("action_type"),
        description: row.get("description"),
        stamps: stamps_from(row),
    }
}

fn journal_kind_str(kind: JournalKind) -> &'static str {
    match kind {
        JournalKind::Location => "location",
        JournalKind::Person => "person",
    }
}

/// Table holding each directly addressable entity kind. History entries
/// span five tables and are handled separately.
fn entity_table(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Cluster => Some("clusters"),
        EntityKind::Location => Some("locations"),
        EntityKind::LandParcel => Some("land_parcels"),
        EntityKind::Person => Some("persons"),
        EntityKind::Institution => Some("institutions"),
        EntityKind::MeasurementEquipment => Some("measurement_equipment"),
        EntityKind::User => Some("users"),
        EntityKind::UsageType => Some("usage_types"),
        EntityKind::HydrologicalSituation => Some("hydrological_situations"),
        EntityKind::SoilType => Some("soil_types"),
        EntityKind::VegetationType => Some("vegetation_types"),
        EntityKind::Role => Some("roles"),
        EntityKind::RoleAssignment => Some("person_location_roles"),
        EntityKind::JournalEntry => Some("journal_entries"),
        EntityKind::HistoryEntry => None,
    }
}

/// COUNT query for the records in `collection` referencing one id through
/// any of their foreign-key columns. Used both for the advisory probe and
/// inside the delete transaction.
fn referencing_count_sql(collection: CollectionName) -> String {
    match collection {
        CollectionName::Locations => {
            "SELECT COUNT(*) AS n FROM locations WHERE cluster_id = $1".to_string()
        }
        CollectionName::LandParcels => {
            "SELECT COUNT(*) AS n FROM land_parcels WHERE owner_id = $1".to_string()
        }
        CollectionName::Persons => {
            "SELECT COUNT(*) AS n FROM persons WHERE institution_id = $1".to_string()
        }
        CollectionName::Users => {
            "SELECT COUNT(*) AS n FROM users WHERE person_id = $1".to_string()
        }
        CollectionName::MeasurementEquipment => {
            "SELECT COUNT(*) AS n FROM measurement_equipment WHERE location_id = $1".to_string()
        }
        CollectionName::LocationJournal => {
            "SELECT COUNT(*) AS n FROM journal_entries \
             WHERE kind = 'location' AND (subject_id = $1 OR related_id = $1)"
                .to_string()
        }
        CollectionName::PersonJournal => {
            "SELECT COUNT(*) AS n FROM journal_entries \
             WHERE kind = 'person' AND (subject_id = $1 OR related_id = $1)"
                .to_string()
        }
        CollectionName::UsageHistory
        | CollectionName::HydrologicalHistory
        | CollectionName::SoilHistory
        | CollectionName::VegetationHistory
        | CollectionName::AffiliationHistory => {
            let category = match collection {
                CollectionName::UsageHistory => HistoryCategory::Usage,
                CollectionName::HydrologicalHistory => HistoryCategory::Hydrological,
                CollectionName::SoilHistory => HistoryCategory::Soil,
                CollectionName::VegetationHistory => HistoryCategory::Vegetation,
                _ => HistoryCategory::Affiliation,
            };
            let (table, subject_col, class_col) = history_table(category);
            format!(
                "SELECT COUNT(*) AS n FROM {} WHERE {} = $1 OR {} = $1",
                table, subject_col, class_col
            )
        }
        CollectionName::RoleAssignments => {
            "SELECT COUNT(*) AS n FROM person_location_roles \
             WHERE person_id = $1 OR location_id = $1 OR role_id = $1"
                .to_string()
        }
        CollectionName::ParcelLinks => {
            "SELECT COUNT(*) AS n FROM location_land_parcels \
             WHERE location_id = $1 OR land_parcel_id = $1"
                .to_string()
        }
    }
}

const HISTORY_CATEGORIES: [HistoryCategory; 5] = [
    HistoryCategory::Usage,
    HistoryCategory::Hydrological,
    HistoryCategory::Soil,
    HistoryCategory::Vegetation,
    HistoryCategory::Affiliation,
];

impl PostgresStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to run schema statement: {}", statement))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn exists(&self, table: &str, id: &Id) -> Result<bool> {
        let row = sqlx::query(&format!("SELECT 1 AS one FROM {} WHERE id = $1", table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to probe for record")?;
        Ok(row.is_some())
    }

    async fn ensure_ref(
        &self,
        field: &'static str,
        kind: EntityKind,
        id: Option<&Id>,
    ) -> Result<()> {
        let Some(id) = id else { return Ok(()) };
        let table = entity_table(kind).expect("referenced kinds live in one table");
        if self.exists(table, id).await? {
            return Ok(());
        }
        Err(RegistryError::DanglingReference {
            field,
            kind,
            id: id.clone(),
        })
    }

    async fn find_history_entry(&self, id: &Id) -> Result<Option<HistoryEntry>> {
        for category in HISTORY_CATEGORIES {
            let (table, _, _) = history_table(category);
            let row = sqlx::query(&format!("SELECT * FROM {} WHERE id = $1", table))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch history entry")?;
            if let Some(row) = row {
                return Ok(Some(history_from(category, &row)));
            }
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl ClusterStore for PostgresStore {
    async fn create_cluster(&self, new: NewCluster) -> Result<Cluster> {
        let cluster = Cluster::create(new)?;
        sqlx::query(
            "INSERT INTO clusters (id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&cluster.id)
        .bind(&cluster.name)
        .bind(&cluster.description)
        .bind(cluster.stamps.created_at)
        .bind(cluster.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert cluster")?;
        Ok(cluster)
    }

    async fn get_cluster(&self, id: &Id) -> Result<Cluster> {
        let row = sqlx::query("SELECT * FROM clusters WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch cluster")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::Cluster, id.clone()))?;
        Ok(cluster_from(&row))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let rows = sqlx::query("SELECT * FROM clusters ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list clusters")?;
        Ok(rows.iter().map(cluster_from).collect())
    }

    async fn update_cluster(&self, id: &Id, new: NewCluster) -> Result<Cluster> {
        let mut cluster = self.get_cluster(id).await?;
        cluster.apply(new)?;
        sqlx::query("UPDATE clusters SET name = $2, description = $3, updated_at = $4 WHERE id = $1")
            .bind(&cluster.id)
            .bind(&cluster.name)
            .bind(&cluster.description)
            .bind(cluster.stamps.updated_at)
            .execute(&self.pool)
            .await
            .context("Failed to update cluster")?;
        Ok(cluster)
    }
}

const LOCATION_COLS: &str =
    "id, name, description, ST_AsText(coordinates) AS coordinates, cluster_id, created_at, updated_at";

#[async_trait::async_trait]
impl LocationStore for PostgresStore {
    async fn create_location(&self, new: NewLocation) -> Result<Location> {
        let location = Location::create(new)?;
        self.ensure_ref("cluster_id", EntityKind::Cluster, location.cluster_id.as_ref())
            .await?;
        sqlx::query(
            "INSERT INTO locations (id, name, description, coordinates, cluster_id, created_at, updated_at) \
             VALUES ($1, $2, $3, ST_GeomFromText($4), $5, $6, $7)",
        )
        .bind(&location.id)
        .bind(&location.name)
        .bind(&location.description)
        .bind(location.coordinates.as_ref().map(|g| g.to_wkt()))
        .bind(&location.cluster_id)
        .bind(location.stamps.created_at)
        .bind(location.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert location")?;
        Ok(location)
    }

    async fn get_location(&self, id: &Id) -> Result<Location> {
        let row = sqlx::query(&format!("SELECT {} FROM locations WHERE id = $1", LOCATION_COLS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch location")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::Location, id.clone()))?;
        location_from(&row)
    }

    async fn list_locations(&self, cluster_id: Option<&Id>) -> Result<Vec<Location>> {
        let rows = match cluster_id {
            Some(cluster_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM locations WHERE cluster_id = $1 ORDER BY created_at",
                    LOCATION_COLS
                ))
                .bind(cluster_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM locations ORDER BY created_at",
                    LOCATION_COLS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list locations")?;
        rows.iter().map(location_from).collect()
    }

    async fn update_location(&self, id: &Id, new: NewLocation) -> Result<Location> {
        let mut location = self.get_location(id).await?;
        self.ensure_ref("cluster_id", EntityKind::Cluster, new.cluster_id.as_ref())
            .await?;
        location.apply(new)?;
        sqlx::query(
            "UPDATE locations SET name = $2, description = $3, coordinates = ST_GeomFromText($4), \
             cluster_id = $5, updated_at = $6 WHERE id = $1",
        )
        .bind(&location.id)
        .bind(&location.name)
        .bind(&location.description)
        .bind(location.coordinates.as_ref().map(|g| g.to_wkt()))
        .bind(&location.cluster_id)
        .bind(location.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update location")?;
        Ok(location)
    }
}

const PARCEL_COLS: &str = "id, parcel_number, area_size, owner_id, address, city, postal_code, \
     country, ST_AsText(coordinates) AS coordinates, created_at, updated_at";

#[async_trait::async_trait]
impl ParcelStore for PostgresStore {
    async fn create_parcel(&self, new: NewLandParcel) -> Result<LandParcel> {
        let parcel = LandParcel::create(new)?;
        self.ensure_ref("owner_id", EntityKind::Person, parcel.owner_id.as_ref())
            .await?;
        sqlx::query(
            "INSERT INTO land_parcels (id, parcel_number, area_size, owner_id, address, city, \
             postal_code, country, coordinates, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, ST_GeomFromText($9), $10, $11)",
        )
        .bind(&parcel.id)
        .bind(&parcel.parcel_number)
        .bind(parcel.area_size)
        .bind(&parcel.owner_id)
        .bind(&parcel.address)
        .bind(&parcel.city)
        .bind(&parcel.postal_code)
        .bind(&parcel.country)
        .bind(parcel.coordinates.as_ref().map(|g| g.to_wkt()))
        .bind(parcel.stamps.created_at)
        .bind(parcel.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert land parcel")?;
        Ok(parcel)
    }

    async fn get_parcel(&self, id: &Id) -> Result<LandParcel> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM land_parcels WHERE id = $1",
            PARCEL_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch land parcel")?
        .ok_or_else(|| RegistryError::not_found(EntityKind::LandParcel, id.clone()))?;
        parcel_from(&row)
    }

    async fn list_parcels(&self) -> Result<Vec<LandParcel>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM land_parcels ORDER BY created_at",
            PARCEL_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list land parcels")?;
        rows.iter().map(parcel_from).collect()
    }

    async fn update_parcel(&self, id: &Id, new: NewLandParcel) -> Result<LandParcel> {
        let mut parcel = self.get_parcel(id).await?;
        self.ensure_ref("owner_id", EntityKind::Person, new.owner_id.as_ref())
            .await?;
        parcel.apply(new)?;
        sqlx::query(
            "UPDATE land_parcels SET parcel_number = $2, area_size = $3, owner_id = $4, \
             address = $5, city = $6, postal_code = $7, country = $8, \
             coordinates = ST_GeomFromText($9), updated_at = $10 WHERE id = $1",
        )
        .bind(&parcel.id)
        .bind(&parcel.parcel_number)
        .bind(parcel.area_size)
        .bind(&parcel.owner_id)
        .bind(&parcel.address)
        .bind(&parcel.city)
        .bind(&parcel.postal_code)
        .bind(&parcel.country)
        .bind(parcel.coordinates.as_ref().map(|g| g.to_wkt()))
        .bind(parcel.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update land parcel")?;
        Ok(parcel)
    }

    async fn link_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<ParcelLink> {
        if !self.exists("locations", location_id).await? {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        self.ensure_ref("land_parcel_id", EntityKind::LandParcel, Some(parcel_id))
            .await?;
        let link = ParcelLink::new(location_id.clone(), parcel_id.clone());
        let result = sqlx::query(
            "INSERT INTO location_land_parcels (id, location_id, land_parcel_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (location_id, land_parcel_id) DO NOTHING",
        )
        .bind(&link.id)
        .bind(&link.location_id)
        .bind(&link.land_parcel_id)
        .bind(link.stamps.created_at)
        .bind(link.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to link parcel")?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::validation(
                "parcel is already linked to this location",
            ));
        }
        Ok(link)
    }

    async fn unlink_parcel(&self, location_id: &Id, parcel_id: &Id) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM location_land_parcels WHERE location_id = $1 AND land_parcel_id = $2",
        )
        .bind(location_id)
        .bind(parcel_id)
        .execute(&self.pool)
        .await
        .context("Failed to unlink parcel")?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::validation(
                "parcel is not linked to this location",
            ));
        }
        Ok(())
    }

    async fn parcels_for_location(&self, location_id: &Id) -> Result<Vec<LandParcel>> {
        if !self.exists("locations", location_id).await? {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        let rows = sqlx::query(
            "SELECT p.id, p.parcel_number, p.area_size, p.owner_id, p.address, p.city, \
             p.postal_code, p.country, ST_AsText(p.coordinates) AS coordinates, \
             p.created_at, p.updated_at \
             FROM land_parcels p \
             JOIN location_land_parcels l ON l.land_parcel_id = p.id \
             WHERE l.location_id = $1 ORDER BY p.created_at",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list parcels for location")?;
        rows.iter().map(parcel_from).collect()
    }
}

#[async_trait::async_trait]
impl PersonStore for PostgresStore {
    async fn create_person(&self, new: NewPerson) -> Result<Person> {
        let person = Person::create(new)?;
        self.ensure_ref(
            "institution_id",
            EntityKind::Institution,
            person.institution_id.as_ref(),
        )
        .await?;
        sqlx::query(
            "INSERT INTO persons (id, salutation, first_name, last_name, address, city, \
             postal_code, country, phone, email, iban, profession, institution_id, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(&person.id)
        .bind(&person.salutation)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.address)
        .bind(&person.city)
        .bind(&person.postal_code)
        .bind(&person.country)
        .bind(&person.phone)
        .bind(&person.email)
        .bind(&person.iban)
        .bind(&person.profession)
        .bind(&person.institution_id)
        .bind(person.stamps.created_at)
        .bind(person.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert person")?;
        Ok(person)
    }

    async fn get_person(&self, id: &Id) -> Result<Person> {
        let row = sqlx::query("SELECT * FROM persons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch person")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::Person, id.clone()))?;
        Ok(person_from(&row))
    }

    async fn list_persons(&self) -> Result<Vec<Person>> {
        let rows = sqlx::query("SELECT * FROM persons ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list persons")?;
        Ok(rows.iter().map(person_from).collect())
    }

    async fn update_person(&self, id: &Id, new: NewPerson) -> Result<Person> {
        let mut person = self.get_person(id).await?;
        self.ensure_ref(
            "institution_id",
            EntityKind::Institution,
            new.institution_id.as_ref(),
        )
        .await?;
        person.apply(new)?;
        sqlx::query(
            "UPDATE persons SET salutation = $2, first_name = $3, last_name = $4, address = $5, \
             city = $6, postal_code = $7, country = $8, phone = $9, email = $10, iban = $11, \
             profession = $12, institution_id = $13, updated_at = $14 WHERE id = $1",
        )
        .bind(&person.id)
        .bind(&person.salutation)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.address)
        .bind(&person.city)
        .bind(&person.postal_code)
        .bind(&person.country)
        .bind(&person.phone)
        .bind(&person.email)
        .bind(&person.iban)
        .bind(&person.profession)
        .bind(&person.institution_id)
        .bind(person.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update person")?;
        Ok(person)
    }
}

#[async_trait::async_trait]
impl InstitutionStore for PostgresStore {
    async fn create_institution(&self, new: NewInstitution) -> Result<Institution> {
        let institution = Institution::create(new)?;
        sqlx::query(
            "INSERT INTO institutions (id, name, type, address, city, postal_code, country, \
             phone, email, website, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&institution.id)
        .bind(&institution.name)
        .bind(&institution.kind)
        .bind(&institution.address)
        .bind(&institution.city)
        .bind(&institution.postal_code)
        .bind(&institution.country)
        .bind(&institution.phone)
        .bind(&institution.email)
        .bind(&institution.website)
        .bind(institution.stamps.created_at)
        .bind(institution.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert institution")?;
        Ok(institution)
    }

    async fn get_institution(&self, id: &Id) -> Result<Institution> {
        let row = sqlx::query("SELECT * FROM institutions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch institution")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::Institution, id.clone()))?;
        Ok(institution_from(&row))
    }

    async fn list_institutions(&self) -> Result<Vec<Institution>> {
        let rows = sqlx::query("SELECT * FROM institutions ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list institutions")?;
        Ok(rows.iter().map(institution_from).collect())
    }

    async fn update_institution(&self, id: &Id, new: NewInstitution) -> Result<Institution> {
        let mut institution = self.get_institution(id).await?;
        institution.apply(new)?;
        sqlx::query(
            "UPDATE institutions SET name = $2, type = $3, address = $4, city = $5, \
             postal_code = $6, country = $7, phone = $8, email = $9, website = $10, \
             updated_at = $11 WHERE id = $1",
        )
        .bind(&institution.id)
        .bind(&institution.name)
        .bind(&institution.kind)
        .bind(&institution.address)
        .bind(&institution.city)
        .bind(&institution.postal_code)
        .bind(&institution.country)
        .bind(&institution.phone)
        .bind(&institution.email)
        .bind(&institution.website)
        .bind(institution.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update institution")?;
        Ok(institution)
    }
}

impl PostgresStore {
    async fn ensure_unique_user(&self, user: &User) -> Result<()> {
        let row = sqlx::query(
            "SELECT username, email FROM users \
             WHERE (username = $1 OR email = $2) AND id <> $3 LIMIT 1",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check user uniqueness")?;
        if let Some(row) = row {
            let taken: String = row.get("username");
            if taken == user.username {
                return Err(RegistryError::validation(format!(
                    "username '{}' is already taken",
                    user.username
                )));
            }
            return Err(RegistryError::validation(format!(
                "email '{}' is already registered",
                user.email
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let user = User::create(new)?;
        self.ensure_ref("person_id", EntityKind::Person, user.person_id.as_ref())
            .await?;
        self.ensure_unique_user(&user).await?;
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, person_id, is_admin, \
             is_active, last_login, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.person_id)
        .bind(user.is_admin)
        .bind(user.is_active)
        .bind(user.last_login)
        .bind(user.stamps.created_at)
        .bind(user.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;
        Ok(user)
    }

    async fn get_user(&self, id: &Id) -> Result<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::User, id.clone()))?;
        Ok(user_from(&row))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;
        Ok(rows.iter().map(user_from).collect())
    }

    async fn update_user(&self, id: &Id, new: NewUser) -> Result<User> {
        let mut user = self.get_user(id).await?;
        self.ensure_ref("person_id", EntityKind::Person, new.person_id.as_ref())
            .await?;
        user.apply(new)?;
        self.ensure_unique_user(&user).await?;
        sqlx::query(
            "UPDATE users SET username = $2, email = $3, password_hash = $4, person_id = $5, \
             is_admin = $6, is_active = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.person_id)
        .bind(user.is_admin)
        .bind(user.is_active)
        .bind(user.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update user")?;
        Ok(user)
    }
}

#[async_trait::async_trait]
impl EquipmentStore for PostgresStore {
    async fn create_equipment(
        &self,
        new: NewMeasurementEquipment,
    ) -> Result<MeasurementEquipment> {
        let equipment = MeasurementEquipment::create(new)?;
        self.ensure_ref(
            "location_id",
            EntityKind::Location,
            equipment.location_id.as_ref(),
        )
        .await?;
        sqlx::query(
            "INSERT INTO measurement_equipment (id, name, type, serial_number, manufacturer, \
             installation_date, location_id, description, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&equipment.id)
        .bind(&equipment.name)
        .bind(&equipment.kind)
        .bind(&equipment.serial_number)
        .bind(&equipment.manufacturer)
        .bind(equipment.installation_date)
        .bind(&equipment.location_id)
        .bind(&equipment.description)
        .bind(&equipment.status)
        .bind(equipment.stamps.created_at)
        .bind(equipment.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert equipment")?;
        Ok(equipment)
    }

    async fn get_equipment(&self, id: &Id) -> Result<MeasurementEquipment> {
        let row = sqlx::query("SELECT * FROM measurement_equipment WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch equipment")?
            .ok_or_else(|| {
                RegistryError::not_found(EntityKind::MeasurementEquipment, id.clone())
            })?;
        Ok(equipment_from(&row))
    }

    async fn list_equipment(
        &self,
        location_id: Option<&Id>,
    ) -> Result<Vec<MeasurementEquipment>> {
        let rows = match location_id {
            Some(location_id) => {
                sqlx::query(
                    "SELECT * FROM measurement_equipment WHERE location_id = $1 ORDER BY created_at",
                )
                .bind(location_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM measurement_equipment ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list equipment")?;
        Ok(rows.iter().map(equipment_from).collect())
    }

    async fn update_equipment(
        &self,
        id: &Id,
        new: NewMeasurementEquipment,
    ) -> Result<MeasurementEquipment> {
        let mut equipment = self.get_equipment(id).await?;
        self.ensure_ref("location_id", EntityKind::Location, new.location_id.as_ref())
            .await?;
        equipment.apply(new)?;
        sqlx::query(
            "UPDATE measurement_equipment SET name = $2, type = $3, serial_number = $4, \
             manufacturer = $5, installation_date = $6, location_id = $7, description = $8, \
             status = $9, updated_at = $10 WHERE id = $1",
        )
        .bind(&equipment.id)
        .bind(&equipment.name)
        .bind(&equipment.kind)
        .bind(&equipment.serial_number)
        .bind(&equipment.manufacturer)
        .bind(equipment.installation_date)
        .bind(&equipment.location_id)
        .bind(&equipment.description)
        .bind(&equipment.status)
        .bind(equipment.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update equipment")?;
        Ok(equipment)
    }
}

#[async_trait::async_trait]
impl LookupStore for PostgresStore {
    async fn create_lookup(&self, kind: LookupKind, new: NewLookupValue) -> Result<LookupValue> {
        let value = LookupValue::create(new)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
            lookup_table(kind)
        ))
        .bind(&value.id)
        .bind(&value.name)
        .bind(&value.description)
        .bind(value.stamps.created_at)
        .bind(value.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert lookup value")?;
        Ok(value)
    }

    async fn get_lookup(&self, kind: LookupKind, id: &Id) -> Result<LookupValue> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE id = $1",
            lookup_table(kind)
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch lookup value")?
        .ok_or_else(|| RegistryError::not_found(kind.entity_kind(), id.clone()))?;
        Ok(lookup_from(&row))
    }

    async fn list_lookups(&self, kind: LookupKind) -> Result<Vec<LookupValue>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} ORDER BY created_at",
            lookup_table(kind)
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list lookup values")?;
        Ok(rows.iter().map(lookup_from).collect())
    }

    async fn update_lookup(
        &self,
        kind: LookupKind,
        id: &Id,
        new: NewLookupValue,
    ) -> Result<LookupValue> {
        let mut value = self.get_lookup(kind, id).await?;
        value.apply(new)?;
        sqlx::query(&format!(
            "UPDATE {} SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
            lookup_table(kind)
        ))
        .bind(&value.id)
        .bind(&value.name)
        .bind(&value.description)
        .bind(value.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update lookup value")?;
        Ok(value)
    }
}

#[async_trait::async_trait]
impl HistoryStore for PostgresStore {
    async fn append_history(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
        new: NewHistoryEntry,
    ) -> Result<HistoryEntry> {
        let (table, subject_col, class_col) = history_table(category);
        let subject_table =
            entity_table(category.subject_kind()).expect("subjects live in one table");
        let class_table = entity_table(category.classification_kind())
            .expect("classifications live in one table");

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin ledger transaction")?;

        // Lock the subject row so concurrent appends for the same subject
        // serialize; the unique (subject, start_date) index backs this up.
        let subject = sqlx::query(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            subject_table
        ))
        .bind(subject_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock ledger subject")?;
        if subject.is_none() {
            return Err(RegistryError::not_found(
                category.subject_kind(),
                subject_id.clone(),
            ));
        }

        let classification = sqlx::query(&format!(
            "SELECT id FROM {} WHERE id = $1",
            class_table
        ))
        .bind(&new.classification_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to resolve classification")?;
        if classification.is_none() {
            return Err(RegistryError::DanglingReference {
                field: "classification_id",
                kind: category.classification_kind(),
                id: new.classification_id.clone(),
            });
        }

        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE {} = $1",
            table, subject_col
        ))
        .bind(subject_id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch existing ledger entries")?;
        let existing: Vec<HistoryEntry> =
            rows.iter().map(|r| history_from(category, r)).collect();
        ledger::ensure_appendable(&existing, new.start_date, new.end_date)?;

        let entry = HistoryEntry::new(category, subject_id.clone(), new);
        sqlx::query(&format!(
            "INSERT INTO {} (id, {}, {}, start_date, end_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            table, subject_col, class_col
        ))
        .bind(&entry.id)
        .bind(&entry.subject_id)
        .bind(&entry.classification_id)
        .bind(entry.start_date)
        .bind(entry.end_date)
        .bind(entry.stamps.created_at)
        .bind(entry.stamps.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert ledger entry")?;

        tx.commit()
            .await
            .context("Failed to commit ledger transaction")?;
        Ok(entry)
    }

    async fn history(
        &self,
        category: HistoryCategory,
        subject_id: &Id,
    ) -> Result<Vec<HistoryEntry>> {
        let subject_table =
            entity_table(category.subject_kind()).expect("subjects live in one table");
        if !self.exists(subject_table, subject_id).await? {
            return Err(RegistryError::not_found(
                category.subject_kind(),
                subject_id.clone(),
            ));
        }
        let (table, subject_col, _) = history_table(category);
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE {} = $1 ORDER BY start_date",
            table, subject_col
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch history")?;
        Ok(rows.iter().map(|r| history_from(category, r)).collect())
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
        self.find_history_entry(id)
            .await?
            .ok_or_else(|| RegistryError::not_found(EntityKind::HistoryEntry, id.clone()))
    }

    async fn close_history_entry(&self, id: &Id, end_date: NaiveDate) -> Result<HistoryEntry> {
        let mut entry = self.get_history_entry(id).await?;
        if entry.end_date.is_some() {
            return Err(RegistryError::validation("history entry is already closed"));
        }
        ledger::validate_span(entry.start_date, Some(end_date))?;
        entry.end_date = Some(end_date);
        entry.stamps.touch();
        let (table, _, _) = history_table(entry.category);
        sqlx::query(&format!(
            "UPDATE {} SET end_date = $2, updated_at = $3 WHERE id = $1",
            table
        ))
        .bind(&entry.id)
        .bind(entry.end_date)
        .bind(entry.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to close ledger entry")?;
        Ok(entry)
    }
}

#[async_trait::async_trait]
impl RoleAssignmentStore for PostgresStore {
    async fn append_role_assignment(&self, new: NewRoleAssignment) -> Result<RoleAssignment> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin ledger transaction")?;

        let person = sqlx::query("SELECT id FROM persons WHERE id = $1 FOR UPDATE")
            .bind(&new.person_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock person")?;
        if person.is_none() {
            return Err(RegistryError::DanglingReference {
                field: "person_id",
                kind: EntityKind::Person,
                id: new.person_id.clone(),
            });
        }
        let location = sqlx::query("SELECT id FROM locations WHERE id = $1 FOR UPDATE")
            .bind(&new.location_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock location")?;
        if location.is_none() {
            return Err(RegistryError::DanglingReference {
                field: "location_id",
                kind: EntityKind::Location,
                id: new.location_id.clone(),
            });
        }
        let role = sqlx::query("SELECT id FROM roles WHERE id = $1")
            .bind(&new.role_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to resolve role")?;
        if role.is_none() {
            return Err(RegistryError::DanglingReference {
                field: "role_id",
                kind: EntityKind::Role,
                id: new.role_id.clone(),
            });
        }

        let rows = sqlx::query(
            "SELECT * FROM person_location_roles WHERE person_id = $1 AND location_id = $2",
        )
        .bind(&new.person_id)
        .bind(&new.location_id)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to fetch existing role assignments")?;
        let existing: Vec<RoleAssignment> = rows.iter().map(assignment_from).collect();
        ledger::ensure_appendable(&existing, new.start_date, new.end_date)?;

        let assignment = RoleAssignment::new(new);
        sqlx::query(
            "INSERT INTO person_location_roles (id, person_id, location_id, role_id, \
             start_date, end_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&assignment.id)
        .bind(&assignment.person_id)
        .bind(&assignment.location_id)
        .bind(&assignment.role_id)
        .bind(assignment.start_date)
        .bind(assignment.end_date)
        .bind(assignment.stamps.created_at)
        .bind(assignment.stamps.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert role assignment")?;

        tx.commit()
            .await
            .context("Failed to commit ledger transaction")?;
        Ok(assignment)
    }

    async fn role_assignments_for_location(
        &self,
        location_id: &Id,
    ) -> Result<Vec<RoleAssignment>> {
        if !self.exists("locations", location_id).await? {
            return Err(RegistryError::not_found(
                EntityKind::Location,
                location_id.clone(),
            ));
        }
        let rows = sqlx::query(
            "SELECT * FROM person_location_roles WHERE location_id = $1 ORDER BY start_date",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list role assignments")?;
        Ok(rows.iter().map(assignment_from).collect())
    }

    async fn role_assignments_for_person(&self, person_id: &Id) -> Result<Vec<RoleAssignment>> {
        if !self.exists("persons", person_id).await? {
            return Err(RegistryError::not_found(
                EntityKind::Person,
                person_id.clone(),
            ));
        }
        let rows = sqlx::query(
            "SELECT * FROM person_location_roles WHERE person_id = $1 ORDER BY start_date",
        )
        .bind(person_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list role assignments")?;
        Ok(rows.iter().map(assignment_from).collect())
    }

    async fn get_role_assignment(&self, id: &Id) -> Result<RoleAssignment> {
        let row = sqlx::query("SELECT * FROM person_location_roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch role assignment")?
            .ok_or_else(|| RegistryError::not_found(EntityKind::RoleAssignment, id.clone()))?;
        Ok(assignment_from(&row))
    }

    async fn close_role_assignment(&self, id: &Id, end_date: NaiveDate) -> Result<RoleAssignment> {
        let mut assignment = self.get_role_assignment(id).await?;
        if assignment.end_date.is_some() {
            return Err(RegistryError::validation("role assignment is already closed"));
        }
        ledger::validate_span(assignment.start_date, Some(end_date))?;
        assignment.end_date = Some(end_date);
        assignment.stamps.touch();
        sqlx::query(
            "UPDATE person_location_roles SET end_date = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(&assignment.id)
        .bind(assignment.end_date)
        .bind(assignment.stamps.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to close role assignment")?;
        Ok(assignment)
    }
}

#[async_trait::async_trait]
impl JournalStore for PostgresStore {
    async fn append_journal(
        &self,
        kind: JournalKind,
        subject_id: &Id,
        new: NewJournalEntry,
    ) -> Result<JournalEntry> {
        let (subject_kind, related_kind, related_field) = match kind {
            JournalKind::Location => (EntityKind::Location, EntityKind::Person, "person_id"),
            JournalKind::Person => (EntityKind::Person, EntityKind::Location, "location_id"),
        };
        let subject_table = entity_table(subject_kind).expect("subjects live in one table");

        // journal_entries carries no foreign keys, so the subject row is
        // locked here to serialize with a concurrent guarded delete.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin journal transaction")?;
        let subject = sqlx::query(&format!(
            "SELECT id FROM {} WHERE id = $1 FOR UPDATE",
            subject_table
        ))
        .bind(subject_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock journal subject")?;
        if subject.is_none() {
            return Err(RegistryError::not_found(subject_kind, subject_id.clone()));
        }
        if let Some(related_id) = new.related_id.as_ref() {
            let related_table =
                entity_table(related_kind).expect("referenced kinds live in one table");
            let related = sqlx::query(&format!(
                "SELECT id FROM {} WHERE id = $1",
                related_table
            ))
            .bind(related_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to resolve journal reference")?;
            if related.is_none() {
                return Err(RegistryError::DanglingReference {
                    field: related_field,
                    kind: related_kind,
                    id: related_id.clone(),
                });
            }
        }
        let entry = JournalEntry::new(kind, subject_id.clone(), new);
        sqlx::query(
            "INSERT INTO journal_entries (id, kind, subject_id, related_id, action_date, \
             action_type, description, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&entry.id)
        .bind(journal_kind_str(kind))
        .bind(&entry.subject_id)
        .bind(&entry.related_id)
        .bind(entry.action_date)
        .bind(&entry.action_type)
        .bind(&entry.description)
        .bind(entry.stamps.created_at)
        .bind(entry.stamps.updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to append journal entry")?;
        tx.commit()
            .await
            .context("Failed to commit journal transaction")?;
        Ok(entry)
    }

    async fn journal_for(&self, kind: JournalKind, subject_id: &Id) -> Result<Vec<JournalEntry>> {
        let subject_kind = match kind {
            JournalKind::Location => EntityKind::Location,
            JournalKind::Person => EntityKind::Person,
        };
        let subject_table = entity_table(subject_kind).expect("subjects live in one table");
        if !self.exists(subject_table, subject_id).await? {
            return Err(RegistryError::not_found(subject_kind, subject_id.clone()));
        }
        let rows = sqlx::query(
            "SELECT * FROM journal_entries WHERE kind = $1 AND subject_id = $2 \
             ORDER BY action_date",
        )
        .bind(journal_kind_str(kind))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list journal entries")?;
        Ok(rows.iter().map(|r| journal_from(kind, r)).collect())
    }
}

#[async_trait::async_trait]
impl ProbeStore for PostgresStore {
    async fn count_referencing(&self, collection: CollectionName, id: &Id) -> Result<u64> {
        let row = sqlx::query(&referencing_count_sql(collection))
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count dependent records")?;
        let count: i64 = row.get("n");
        Ok(count as u64)
    }

    async fn delete_entity(&self, kind: EntityKind, id: &Id) -> Result<()> {
        if kind == EntityKind::JournalEntry {
            return Err(RegistryError::validation(
                "journal entries are append-only and cannot be removed",
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin delete transaction")?;

        // History entries span five tables and nothing references them;
        // one transactional sweep suffices.
        if kind == EntityKind::HistoryEntry {
            let mut removed = false;
            for category in HISTORY_CATEGORIES {
                let (table, _, _) = history_table(category);
                let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table))
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to delete history entry")?;
                if result.rows_affected() > 0 {
                    removed = true;
                    break;
                }
            }
            if !removed {
                return Err(RegistryError::not_found(kind, id.clone()));
            }
            tx.commit()
                .await
                .context("Failed to commit delete transaction")?;
            return Ok(());
        }

        let table = entity_table(kind).expect("non-history kinds live in one table");

        // Lock the subject row so concurrent appends against it (which also
        // lock the row, or hold an FK on it) serialize with the probes.
        let subject = sqlx::query(&format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", table))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to lock record for deletion")?;
        if subject.is_none() {
            return Err(RegistryError::not_found(kind, id.clone()));
        }

        let mut blocking = Vec::new();
        for &collection in dependent_collections(kind) {
            let row = sqlx::query(&referencing_count_sql(collection))
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to count dependent records")?;
            let count: i64 = row.get("n");
            if count > 0 {
                blocking.push(collection);
            }
        }
        if !blocking.is_empty() {
            return Err(RegistryError::HasDependents {
                kind,
                id: id.clone(),
                collections: blocking,
            });
        }

        // ON DELETE RESTRICT is the safety net under the probes; a foreign
        // key violation here is still a dependency, not a storage failure.
        if let Err(err) = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table))
            .bind(id)
            .execute(&mut *tx)
            .await
        {
            if let sqlx::Error::Database(db) = &err {
                if db.code().as_deref() == Some("23503") {
                    return Err(RegistryError::HasDependents {
                        kind,
                        id: id.clone(),
                        collections: dependent_collections(kind).to_vec(),
                    });
                }
            }
            return Err(anyhow::Error::from(err)
                .context("Failed to delete record")
                .into());
        }

        tx.commit()
            .await
            .context("Failed to commit delete transaction")?;
        Ok(())
    }
}

impl Store for PostgresStore {}
