use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Every registry record kind. Used by the integrity guard's dependency
/// table and by error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Cluster,
    Location,
    LandParcel,
    Person,
    Institution,
    MeasurementEquipment,
    User,
    UsageType,
    HydrologicalSituation,
    SoilType,
    VegetationType,
    Role,
    HistoryEntry,
    RoleAssignment,
    JournalEntry,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Cluster => "cluster",
            EntityKind::Location => "location",
            EntityKind::LandParcel => "land parcel",
            EntityKind::Person => "person",
            EntityKind::Institution => "institution",
            EntityKind::MeasurementEquipment => "measurement equipment",
            EntityKind::User => "user",
            EntityKind::UsageType => "usage type",
            EntityKind::HydrologicalSituation => "hydrological situation",
            EntityKind::SoilType => "soil type",
            EntityKind::VegetationType => "vegetation type",
            EntityKind::Role => "role",
            EntityKind::HistoryEntry => "history entry",
            EntityKind::RoleAssignment => "role assignment",
            EntityKind::JournalEntry => "journal entry",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation/modification stamps shared by every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamps {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stamps {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
