use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::logic::guard::CollectionName;
use crate::model::{EntityKind, Id};

/// Domain error taxonomy. None of these are retried inside the core;
/// they surface directly to the caller. Transient storage failures travel
/// through the `Storage` variant and are the boundary's problem.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: Id },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{field} references missing {kind} '{id}'")]
    DanglingReference {
        field: &'static str,
        kind: EntityKind,
        id: Id,
    },

    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    #[error("invalid range: end date {end} precedes start date {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("range starting {start} overlaps an existing entry for this subject")]
    OverlapViolation { start: NaiveDate },

    #[error("{kind} '{id}' still has dependent records")]
    HasDependents {
        kind: EntityKind,
        id: Id,
        collections: Vec<CollectionName>,
    },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn not_found(kind: EntityKind, id: impl Into<Id>) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RegistryError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::Validation(_)
            | RegistryError::DanglingReference { .. }
            | RegistryError::MalformedGeometry(_)
            | RegistryError::InvalidRange { .. }
            | RegistryError::HasDependents { .. } => StatusCode::BAD_REQUEST,
            RegistryError::OverlapViolation { .. } => StatusCode::CONFLICT,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure body, the mirror image of the success body: `success` is always
/// false and `message` carries the human-readable reason.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    /// Set only for blocked deletes, so the caller can see exactly which
    /// collections to clear first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_collections: Option<Vec<CollectionName>>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        if let RegistryError::Storage(ref e) = self {
            log::error!("storage failure: {:#}", e);
        }
        let blocking_collections = match &self {
            RegistryError::HasDependents { collections, .. } => Some(collections.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
            blocking_collections,
        };
        (self.status_code(), Json(body)).into_response()
    }
}
