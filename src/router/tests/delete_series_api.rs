use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use common::config::DeleteStoreConfig;
use deletes::{DeleteStore, MemoryIndexClient, TombstonesLoader};
use router::{ApiError, DeletesStateImpl, TENANT_HEADER, create_router};
use serde_json::Value;
use tower::ServiceExt;

const DELETE_SERIES: &str = "/api/v1/admin/tsdb/delete_series";

fn create_test_app() -> (Router, Arc<TombstonesLoader>) {
    let config = DeleteStoreConfig::default();
    let store = DeleteStore::with_index(Arc::new(MemoryIndexClient::default()), &config);
    let loader = Arc::new(TombstonesLoader::new(store.clone(), &config));
    let app = create_router(DeletesStateImpl::new(store, loader.clone()));
    (app, loader)
}

fn post(uri: &str, tenant: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(tenant) = tenant {
        builder = builder.header(TENANT_HEADER, tenant);
    }
    builder.body(Body::empty()).unwrap()
}

fn get(uri: &str, tenant: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(TENANT_HEADER, tenant)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, loader) = create_test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    loader.stop().await;
}

#[tokio::test]
async fn test_submit_and_list() {
    let (app, loader) = create_test_app();

    let uri = format!(
        "{DELETE_SERIES}?match%5B%5D=up%7Bjob%3D%22api%22%7D&match%5B%5D=down&start=1&end=2"
    );
    let response = app.clone().oneshot(post(&uri, Some("team-a"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.clone().oneshot(get(DELETE_SERIES, "team-a")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let requests = body.as_array().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["start_time"], 1_000);
    assert_eq!(requests[0]["end_time"], 2_000);
    assert_eq!(requests[0]["status"], "0");
    assert_eq!(requests[0]["selectors"][0], r#"up{job="api"}"#);
    assert_eq!(requests[0]["selectors"][1], "down");
    assert_eq!(requests[0]["request_id"].as_str().unwrap().len(), 8);

    // Other tenants do not see it.
    let response = app.clone().oneshot(get(DELETE_SERIES, "team-b")).await.unwrap();
    assert_eq!(json_body(response).await, Value::Array(vec![]));

    loader.stop().await;
}

#[tokio::test]
async fn test_validation_errors() {
    let (app, loader) = create_test_app();

    let cases = [
        (format!("{DELETE_SERIES}?match%5B%5D=up"), None),
        (DELETE_SERIES.to_string(), Some("t")),
        (format!("{DELETE_SERIES}?match%5B%5D=up%7B"), Some("t")),
        (
            format!("{DELETE_SERIES}?match%5B%5D=%7Bjob%3D%22x%22%20or%20job%3D%22y%22%7D"),
            Some("t"),
        ),
        (format!("{DELETE_SERIES}?match%5B%5D=up&end=99999999999"), Some("t")),
        (format!("{DELETE_SERIES}?match%5B%5D=up&start=20&end=10"), Some("t")),
        (format!("{DELETE_SERIES}?match%5B%5D=up&start=soon"), Some("t")),
    ];

    for (uri, tenant) in cases {
        let response = app.clone().oneshot(post(&uri, tenant)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let error: ApiError = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(error.error, "validation_error");
    }

    let response = app.clone().oneshot(get(DELETE_SERIES, "t")).await.unwrap();
    assert_eq!(json_body(response).await, Value::Array(vec![]));

    loader.stop().await;
}

#[tokio::test]
async fn test_tombstones_snapshot() {
    let (app, loader) = create_test_app();

    let uri = format!("{DELETE_SERIES}?match%5B%5D=up&start=100&end=200");
    let response = app.clone().oneshot(post(&uri, Some("t"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get("/api/v1/admin/tsdb/tombstones", "t"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["oldest_start"], 100_000);
    assert_eq!(body["newest_end"], 200_000);
    assert_eq!(body["tombstones"].as_array().unwrap().len(), 1);
    assert!(loader.is_cached("t").await);

    loader.stop().await;
}
