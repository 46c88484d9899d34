use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::model::{generate_id, EntityKind, Geometry, Id, Stamps};

fn required(field: &str, value: &str) -> Result<String, RegistryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Decode an optional WKT field and enforce the geometry kind the entity
/// carries. The kind is fixed at creation; a mismatch is an error, never a
/// coercion.
fn decode_geometry(
    field: &str,
    wkt: Option<&str>,
    want_point: bool,
) -> Result<Option<Geometry>, RegistryError> {
    let Some(wkt) = wkt else { return Ok(None) };
    let geometry = Geometry::from_wkt(wkt)?;
    let matches = if want_point {
        geometry.is_point()
    } else {
        geometry.is_polygon()
    };
    if !matches {
        return Err(RegistryError::validation(format!(
            "{} must be a {}",
            field,
            if want_point { "point" } else { "polygon" }
        )));
    }
    Ok(Some(geometry))
}

// ---------------------------------------------------------------------------
// Cluster

/// A group of monitoring sites in one peatland area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCluster {
    pub name: String,
    pub description: Option<String>,
}

impl Cluster {
    pub fn create(new: NewCluster) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            name: required("cluster name", &new.name)?,
            description: new.description,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewCluster) -> Result<(), RegistryError> {
        self.name = required("cluster name", &new.name)?;
        self.description = new.description;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Location

/// A monitoring site. Carries a point geometry and belongs to at most one
/// cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub coordinates: Option<Geometry>,
    pub cluster_id: Option<Id>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLocation {
    pub name: String,
    pub description: Option<String>,
    /// WKT point, e.g. `POINT(10.5 53.5)`.
    pub coordinates: Option<String>,
    pub cluster_id: Option<Id>,
}

impl Location {
    pub fn create(new: NewLocation) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            name: required("location name", &new.name)?,
            coordinates: decode_geometry("location coordinates", new.coordinates.as_deref(), true)?,
            description: new.description,
            cluster_id: new.cluster_id,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewLocation) -> Result<(), RegistryError> {
        self.name = required("location name", &new.name)?;
        self.coordinates =
            decode_geometry("location coordinates", new.coordinates.as_deref(), true)?;
        self.description = new.description;
        self.cluster_id = new.cluster_id;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LandParcel

/// A cadastral parcel. Carries a polygon geometry and an optional owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandParcel {
    pub id: Id,
    pub parcel_number: String,
    pub area_size: Option<f64>,
    pub owner_id: Option<Id>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub coordinates: Option<Geometry>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLandParcel {
    pub parcel_number: String,
    pub area_size: Option<f64>,
    pub owner_id: Option<Id>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    /// WKT polygon with a single closed ring.
    pub coordinates: Option<String>,
}

impl LandParcel {
    pub fn create(new: NewLandParcel) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            parcel_number: required("parcel number", &new.parcel_number)?,
            coordinates: decode_geometry("parcel coordinates", new.coordinates.as_deref(), false)?,
            area_size: new.area_size,
            owner_id: new.owner_id,
            address: new.address,
            city: new.city,
            postal_code: new.postal_code,
            country: new.country,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewLandParcel) -> Result<(), RegistryError> {
        self.parcel_number = required("parcel number", &new.parcel_number)?;
        self.coordinates =
            decode_geometry("parcel coordinates", new.coordinates.as_deref(), false)?;
        self.area_size = new.area_size;
        self.owner_id = new.owner_id;
        self.address = new.address;
        self.city = new.city;
        self.postal_code = new.postal_code;
        self.country = new.country;
        self.stamps.touch();
        Ok(())
    }
}

/// Many-to-many link between a location and a land parcel. The pair is
/// unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelLink {
    pub id: Id,
    pub location_id: Id,
    pub land_parcel_id: Id,
    #[serde(flatten)]
    pub stamps: Stamps,
}

impl ParcelLink {
    pub fn new(location_id: Id, land_parcel_id: Id) -> Self {
        Self {
            id: generate_id(),
            location_id,
            land_parcel_id,
            stamps: Stamps::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Person

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Id,
    pub salutation: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub iban: Option<String>,
    pub profession: Option<String>,
    /// Current affiliation; past affiliations live in the history ledger.
    pub institution_id: Option<Id>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPerson {
    pub salutation: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub iban: Option<String>,
    pub profession: Option<String>,
    pub institution_id: Option<Id>,
}

impl Person {
    pub fn create(new: NewPerson) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            first_name: required("first name", &new.first_name)?,
            last_name: required("last name", &new.last_name)?,
            salutation: new.salutation,
            address: new.address,
            city: new.city,
            postal_code: new.postal_code,
            country: new.country,
            phone: new.phone,
            email: new.email,
            iban: new.iban,
            profession: new.profession,
            institution_id: new.institution_id,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewPerson) -> Result<(), RegistryError> {
        self.first_name = required("first name", &new.first_name)?;
        self.last_name = required("last name", &new.last_name)?;
        self.salutation = new.salutation;
        self.address = new.address;
        self.city = new.city;
        self.postal_code = new.postal_code;
        self.country = new.country;
        self.phone = new.phone;
        self.email = new.email;
        self.iban = new.iban;
        self.profession = new.profession;
        self.institution_id = new.institution_id;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Institution

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInstitution {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl Institution {
    pub fn create(new: NewInstitution) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            name: required("institution name", &new.name)?,
            kind: new.kind,
            address: new.address,
            city: new.city,
            postal_code: new.postal_code,
            country: new.country,
            phone: new.phone,
            email: new.email,
            website: new.website,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewInstitution) -> Result<(), RegistryError> {
        self.name = required("institution name", &new.name)?;
        self.kind = new.kind;
        self.address = new.address;
        self.city = new.city;
        self.postal_code = new.postal_code;
        self.country = new.country;
        self.phone = new.phone;
        self.email = new.email;
        self.website = new.website;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Measurement equipment

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEquipment {
    pub id: Id,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub location_id: Option<Id>,
    pub description: Option<String>,
    pub status: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMeasurementEquipment {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub installation_date: Option<NaiveDate>,
    pub location_id: Option<Id>,
    pub description: Option<String>,
    pub status: Option<String>,
}

impl MeasurementEquipment {
    pub fn create(new: NewMeasurementEquipment) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            name: required("equipment name", &new.name)?,
            kind: new.kind,
            serial_number: new.serial_number,
            manufacturer: new.manufacturer,
            installation_date: new.installation_date,
            location_id: new.location_id,
            description: new.description,
            status: new.status,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewMeasurementEquipment) -> Result<(), RegistryError> {
        self.name = required("equipment name", &new.name)?;
        self.kind = new.kind;
        self.serial_number = new.serial_number;
        self.manufacturer = new.manufacturer;
        self.installation_date = new.installation_date;
        self.location_id = new.location_id;
        self.description = new.description;
        self.status = new.status;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Users

/// Login identity, optionally linked 1:1 to a person. Session handling
/// lives outside the core; only the record is kept here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub person_id: Option<Id>,
    pub is_admin: bool,
    pub is_active: bool,
    pub last_login: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub person_id: Option<Id>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn create(new: NewUser) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            username: required("username", &new.username)?,
            email: required("email", &new.email)?,
            password_hash: required("password hash", &new.password_hash)?,
            person_id: new.person_id,
            is_admin: new.is_admin,
            is_active: new.is_active,
            last_login: None,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewUser) -> Result<(), RegistryError> {
        self.username = required("username", &new.username)?;
        self.email = required("email", &new.email)?;
        self.password_hash = required("password hash", &new.password_hash)?;
        self.person_id = new.person_id;
        self.is_admin = new.is_admin;
        self.is_active = new.is_active;
        self.stamps.touch();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Classification lookups

/// The five flat classification tables: usage types, hydrological
/// situations, soil types, vegetation types, and roles. All share the
/// same name/description shape, so one record type covers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupKind {
    UsageTypes,
    HydrologicalSituations,
    SoilTypes,
    VegetationTypes,
    Roles,
}

impl LookupKind {
    pub const ALL: [LookupKind; 5] = [
        LookupKind::UsageTypes,
        LookupKind::HydrologicalSituations,
        LookupKind::SoilTypes,
        LookupKind::VegetationTypes,
        LookupKind::Roles,
    ];

    pub fn entity_kind(self) -> EntityKind {
        match self {
            LookupKind::UsageTypes => EntityKind::UsageType,
            LookupKind::HydrologicalSituations => EntityKind::HydrologicalSituation,
            LookupKind::SoilTypes => EntityKind::SoilType,
            LookupKind::VegetationTypes => EntityKind::VegetationType,
            LookupKind::Roles => EntityKind::Role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupValue {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLookupValue {
    pub name: String,
    pub description: Option<String>,
}

impl LookupValue {
    pub fn create(new: NewLookupValue) -> Result<Self, RegistryError> {
        Ok(Self {
            id: generate_id(),
            name: required("name", &new.name)?,
            description: new.description,
            stamps: Stamps::now(),
        })
    }

    pub fn apply(&mut self, new: NewLookupValue) -> Result<(), RegistryError> {
        self.name = required("name", &new.name)?;
        self.description = new.description;
        self.stamps.touch();
        Ok(())
    }
}
