use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use moor_registry::api::routes::create_router;
use moor_registry::store::MemoryStore;

async fn spawn_server() -> SocketAddr {
    let store = Arc::new(MemoryStore::new());
    let app = create_router().with_state(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn health_endpoint_responds() {
    let addr = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn location_read_resolves_cluster_name_and_wkt() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let cluster: Value = client
        .post(format!("{}/api/clusters", base))
        .json(&json!({"name": "Nordmoor", "description": "Moorgebiet im Norden"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let location: Value = client
        .post(format!("{}/api/locations", base))
        .json(&json!({
            "name": "Nordmoor-Standort 1",
            "coordinates": "POINT(10.5 53.5)",
            "cluster_id": cluster["id"],
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let read: Value = client
        .get(format!("{}/api/locations/{}", base, location["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(read["cluster_name"], "Nordmoor");
    assert_eq!(read["coordinates_str"], "POINT(10.5 53.5)");
}

#[tokio::test]
async fn malformed_geometry_is_a_bad_request() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/api/locations", addr))
        .json(&json!({"name": "Standort", "coordinates": "POINT(10.5)"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("geometry"));
}

#[tokio::test]
async fn blocked_delete_reports_blocking_collections() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let cluster: Value = client
        .post(format!("{}/api/clusters", base))
        .json(&json!({"name": "Nordmoor"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    client
        .post(format!("{}/api/locations", base))
        .json(&json!({"name": "Standort", "cluster_id": cluster["id"]}))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let response = client
        .delete(format!(
            "{}/api/clusters/{}",
            base,
            cluster["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("dependent"));
    assert_eq!(body["blocking_collections"][0], "Locations");
}

#[tokio::test]
async fn ledger_overlap_is_a_conflict() {
    let addr = spawn_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let location: Value = client
        .post(format!("{}/api/locations", base))
        .json(&json!({"name": "Standort"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let usage: Value = client
        .post(format!("{}/api/lookups/usage-types", base))
        .json(&json!({"name": "Naturschutz"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let history_url = format!(
        "{}/api/locations/{}/history/usage",
        base,
        location["id"].as_str().unwrap()
    );
    client
        .post(&history_url)
        .json(&json!({
            "classification_id": usage["id"],
            "start_date": "2020-01-01",
        }))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let response = client
        .post(&history_url)
        .json(&json!({
            "classification_id": usage["id"],
            "start_date": "2021-01-01",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
}
