use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::services::ServeDir;

use crate::api::handlers;
use crate::store::Store;

/// Build the full API router. The store backend is the only state; every
/// handler is generic over it, so tests run the same routes against the
/// in-memory backend.
pub fn create_router<S: Store + 'static>() -> Router<Arc<S>> {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        // clusters
        .route(
            "/api/clusters",
            get(handlers::list_clusters).post(handlers::create_cluster),
        )
        .route(
            "/api/clusters/:id",
            get(handlers::get_cluster)
                .put(handlers::update_cluster)
                .delete(handlers::delete_cluster),
        )
        .route("/api/clusters/:id/locations", get(handlers::cluster_locations))
        // locations
        .route(
            "/api/locations",
            get(handlers::list_locations).post(handlers::create_location),
        )
        .route(
            "/api/locations/:id",
            get(handlers::get_location)
                .put(handlers::update_location)
                .delete(handlers::delete_location),
        )
        .route(
            "/api/locations/:id/history/:category",
            get(handlers::location_history).post(handlers::append_location_history),
        )
        .route(
            "/api/locations/:id/history/:category/current",
            get(handlers::current_location_history),
        )
        .route(
            "/api/locations/:id/equipment",
            get(handlers::location_equipment),
        )
        .route("/api/locations/:id/parcels", get(handlers::location_parcels))
        .route(
            "/api/locations/:id/parcels/:parcel_id",
            post(handlers::link_parcel).delete(handlers::unlink_parcel),
        )
        .route(
            "/api/locations/:id/roles",
            get(handlers::location_role_assignments),
        )
        .route(
            "/api/locations/:id/journal",
            get(handlers::location_journal).post(handlers::append_location_journal),
        )
        // history entries addressed by id
        .route(
            "/api/history/:id",
            get(handlers::get_history_entry).delete(handlers::delete_history_entry),
        )
        .route("/api/history/:id/close", post(handlers::close_history_entry))
        // land parcels
        .route(
            "/api/parcels",
            get(handlers::list_parcels).post(handlers::create_parcel),
        )
        .route(
            "/api/parcels/:id",
            get(handlers::get_parcel)
                .put(handlers::update_parcel)
                .delete(handlers::delete_parcel),
        )
        // persons
        .route(
            "/api/persons",
            get(handlers::list_persons).post(handlers::create_person),
        )
        .route(
            "/api/persons/:id",
            get(handlers::get_person)
                .put(handlers::update_person)
                .delete(handlers::delete_person),
        )
        .route(
            "/api/persons/:id/affiliations",
            get(handlers::affiliation_history).post(handlers::append_affiliation),
        )
        .route(
            "/api/persons/:id/affiliations/current",
            get(handlers::current_affiliation),
        )
        .route(
            "/api/persons/:id/roles",
            get(handlers::person_role_assignments),
        )
        .route(
            "/api/persons/:id/journal",
            get(handlers::person_journal).post(handlers::append_person_journal),
        )
        // institutions
        .route(
            "/api/institutions",
            get(handlers::list_institutions).post(handlers::create_institution),
        )
        .route(
            "/api/institutions/:id",
            get(handlers::get_institution)
                .put(handlers::update_institution)
                .delete(handlers::delete_institution),
        )
        // users
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/users/:id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // equipment
        .route(
            "/api/equipment",
            get(handlers::list_equipment).post(handlers::create_equipment),
        )
        .route(
            "/api/equipment/:id",
            get(handlers::get_equipment)
                .put(handlers::update_equipment)
                .delete(handlers::delete_equipment),
        )
        // classification lookups
        .route(
            "/api/lookups/:kind",
            get(handlers::list_lookups).post(handlers::create_lookup),
        )
        .route(
            "/api/lookups/:kind/:id",
            get(handlers::get_lookup)
                .put(handlers::update_lookup)
                .delete(handlers::delete_lookup),
        )
        // role assignments
        .route("/api/roles/assignments", post(handlers::append_role_assignment))
        .route(
            "/api/roles/assignments/:id",
            get(handlers::get_role_assignment).delete(handlers::delete_role_assignment),
        )
        .route(
            "/api/roles/assignments/:id/close",
            post(handlers::close_role_assignment),
        )
        // static frontend
        .fallback_service(ServeDir::new("frontend"))
}
