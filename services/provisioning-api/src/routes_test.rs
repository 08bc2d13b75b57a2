//! Router tests against the in-memory store

use crate::routes::create_router;
use allocation_store::{InMemoryStore, StaticRangeRegistry};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use site_allocator::{Allocator, AllocatorConfig, SubstringClassifier};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const RANGES: &str = r#"
clusters:
  - id: 1
    name: metro-north
    primaryVcid: { start: 1000, end: 1100 }
    secondaryVcid: { start: 2000, end: 2100 }
    vsiId: { start: 3000, end: 3100 }
regions:
  - id: 1
    name: East
    cluster: 1
    ipBlocks: ["10.1.1.0/24"]
    vlan: { start: 100, end: 200 }
  - id: 2
    name: Unwired
    vlan: { start: 100, end: 200 }
"#;

fn app(store: &InMemoryStore) -> Router {
    let registry = StaticRangeRegistry::from_yaml_str(RANGES).unwrap();
    let config = AllocatorConfig {
        lock_timeout: Duration::from_millis(200),
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        ..AllocatorConfig::default()
    };
    let allocator = Allocator::new(Arc::new(registry), Arc::new(store.clone()), config)
        .with_classifier(Arc::new(SubstringClassifier::new().rule("hw", "Huawei")));
    create_router(Arc::new(allocator))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

#[tokio::test]
async fn test_healthz() {
    let app = app(&InMemoryStore::new());
    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));
}

#[tokio::test]
async fn test_allocate_returns_created_values() {
    let app = app(&InMemoryStore::new());

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteA", "regionId": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["siteName"], "SiteA");
    assert_eq!(body["ip"], "10.1.1.1");
    assert_eq!(body["vlan"], 100);
    assert_eq!(body["primaryVcid"], 1000);
    assert_eq!(body["secondaryVcid"], 2000);
    assert_eq!(body["vsiId"], 3000);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteB", "regionId": 1, "requestedBy": "ops"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["ip"], "10.1.1.5");
    assert_eq!(body["createdBy"], "ops");
}

#[tokio::test]
async fn test_repeat_allocation_returns_existing() {
    let store = InMemoryStore::new();
    let app = app(&store);
    let request = json!({"siteName": "SiteA", "regionId": 1});

    let (_, first) = send(&app, "POST", "/v1/assignments", Some(request.clone())).await;
    let (status, again) = send(&app, "POST", "/v1/assignments", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], again["id"]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_error_responses() {
    let store = InMemoryStore::new();
    let app = app(&store);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": " ", "regionId": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ValidationError");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteZ", "regionId": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ConfigurationMissing");
    assert!(body["error"].as_str().unwrap().contains("region 2"));

    store.inject_conflicts(3);
    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteC", "regionId": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorKind"], "ConcurrentConflict");
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_malformed_input_is_validation_error() {
    let store = InMemoryStore::new();
    let app = app(&store);

    let (status, body) = send(&app, "POST", "/v1/assignments", Some(json!({"siteName": "SiteA"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ValidationError");
    assert!(body["error"].as_str().unwrap().contains("regionId"));

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments/bulk",
        Some(json!({"sites": [{"siteName": "SiteA", "regionId": "east"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ValidationError");

    let (status, body) = send(&app, "GET", "/v1/assignments/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ValidationError");

    let (status, body) = send(&app, "GET", "/v1/regions/east/utilization", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorKind"], "ValidationError");

    assert!(store.is_empty());
}

#[tokio::test]
async fn test_get_update_and_release() {
    let store = InMemoryStore::new();
    let app = app(&store);

    let (_, created) = send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "HW-CAIRO-12", "regionId": 1})),
    )
    .await;
    assert_eq!(created["vendor"], "Huawei");
    let uri = format!("/v1/assignments/{}", created["id"]);

    let (status, fetched) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, updated) = send(&app, "PATCH", &uri, Some(json!({"vendor": "Nokia"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["vendor"], "Nokia");
    assert_eq!(updated["ip"], created["ip"]);

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(store.is_empty());

    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorKind"], "NotFound");

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_allocation() {
    let store = InMemoryStore::new();
    let app = app(&store);
    send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteA", "regionId": 1})),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/assignments/bulk",
        Some(json!({"sites": [
            {"siteName": "SiteA", "regionId": 1},
            {"siteName": "SiteB", "regionId": 1},
            {"siteName": "SiteZ", "regionId": 2}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], "alreadyAssigned");
    assert_eq!(results[1]["status"], "allocated");
    assert_eq!(results[1]["assignment"]["ip"], "10.1.1.5");
    assert_eq!(results[2]["status"], "failed");
    assert_eq!(results[2]["errorKind"], "ConfigurationMissing");
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_region_utilization() {
    let app = app(&InMemoryStore::new());
    send(
        &app,
        "POST",
        "/v1/assignments",
        Some(json!({"siteName": "SiteA", "regionId": 1})),
    )
    .await;

    let (status, body) = send(&app, "GET", "/v1/regions/1/utilization", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["regionName"], "East");
    let subnets = &body["resources"][0];
    assert_eq!(subnets["total"], 64);
    assert_eq!(subnets["allocated"], 1);
    assert_eq!(subnets["available"], 63);

    let (status, _) = send(&app, "GET", "/v1/regions/42/utilization", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
