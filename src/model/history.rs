use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{generate_id, EntityKind, Id, LookupKind, Stamps};

/// Attribute categories tracked as dated history. Four per location, plus
/// the person-institution affiliation trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCategory {
    Usage,
    Hydrological,
    Soil,
    Vegetation,
    Affiliation,
}

impl HistoryCategory {
    /// What the subject id must resolve to.
    pub fn subject_kind(self) -> EntityKind {
        match self {
            HistoryCategory::Affiliation => EntityKind::Person,
            _ => EntityKind::Location,
        }
    }

    /// What the classification id must resolve to. Affiliation entries
    /// point at institutions, the rest at their lookup table.
    pub fn classification_lookup(self) -> Option<LookupKind> {
        match self {
            HistoryCategory::Usage => Some(LookupKind::UsageTypes),
            HistoryCategory::Hydrological => Some(LookupKind::HydrologicalSituations),
            HistoryCategory::Soil => Some(LookupKind::SoilTypes),
            HistoryCategory::Vegetation => Some(LookupKind::VegetationTypes),
            HistoryCategory::Affiliation => None,
        }
    }

    pub fn classification_kind(self) -> EntityKind {
        match self.classification_lookup() {
            Some(lookup) => lookup.entity_kind(),
            None => EntityKind::Institution,
        }
    }
}

/// Anything with a `[start, end]` date range, end nullable for "currently
/// in effect". The ledger's overlap rules are written against this.
pub trait DateSpan {
    fn start_date(&self) -> NaiveDate;
    fn end_date(&self) -> Option<NaiveDate>;
}

/// One dated classification of a subject. Ranges for the same
/// (subject, category) pair never overlap; at most one is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Id,
    pub category: HistoryCategory,
    pub subject_id: Id,
    pub classification_id: Id,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHistoryEntry {
    pub classification_id: Id,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl HistoryEntry {
    pub fn new(category: HistoryCategory, subject_id: Id, new: NewHistoryEntry) -> Self {
        Self {
            id: generate_id(),
            category,
            subject_id,
            classification_id: new.classification_id,
            start_date: new.start_date,
            end_date: new.end_date,
            stamps: Stamps::now(),
        }
    }
}

impl DateSpan for HistoryEntry {
    fn start_date(&self) -> NaiveDate {
        self.start_date
    }
    fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }
}

/// Ternary relation: a person holds a role at a location for a date range.
/// Same non-overlap rules as history entries, keyed per (person, location).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: Id,
    pub person_id: Id,
    pub location_id: Id,
    pub role_id: Id,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoleAssignment {
    pub person_id: Id,
    pub location_id: Id,
    pub role_id: Id,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl RoleAssignment {
    pub fn new(new: NewRoleAssignment) -> Self {
        Self {
            id: generate_id(),
            person_id: new.person_id,
            location_id: new.location_id,
            role_id: new.role_id,
            start_date: new.start_date,
            end_date: new.end_date,
            stamps: Stamps::now(),
        }
    }
}

impl DateSpan for RoleAssignment {
    fn start_date(&self) -> NaiveDate {
        self.start_date
    }
    fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }
}

/// Which journal a dated event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    Location,
    Person,
}

/// Append-only audit trail entry. No update or delete exists for these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Id,
    pub kind: JournalKind,
    /// The location (for location journals) or person (for person
    /// journals) the entry belongs to.
    pub subject_id: Id,
    /// Optional cross-reference: acting person for location journals,
    /// involved location for person journals.
    pub related_id: Option<Id>,
    pub action_date: NaiveDate,
    pub action_type: Option<String>,
    pub description: Option<String>,
    #[serde(flatten)]
    pub stamps: Stamps,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewJournalEntry {
    pub related_id: Option<Id>,
    pub action_date: NaiveDate,
    pub action_type: Option<String>,
    pub description: Option<String>,
}

impl JournalEntry {
    pub fn new(kind: JournalKind, subject_id: Id, new: NewJournalEntry) -> Self {
        Self {
            id: generate_id(),
            kind,
            subject_id,
            related_id: new.related_id,
            action_date: new.action_date,
            action_type: new.action_type,
            description: new.description,
            stamps: Stamps::now(),
        }
    }
}
