mod support;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
    },
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use etagger::application::validator::EtagStrategy;
use etagger::domain::types::ResourceKey;
use etagger::infra::http::{
    CACHE_INVALIDATION_HEADER, HttpState, REQUEST_ID_HEADER, build_router,
};
use etagger::infra::metrics::{MetricsObserver, RequestLog};

use support::{Harness, ZeroVersionUsers, harness, harness_over};

fn app() -> (Router, Harness) {
    let h = harness(EtagStrategy::Version);
    let state = HttpState::new(h.engine.clone(), Arc::new(MetricsObserver::new()));
    (build_router(state), h)
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

fn get(uri: &str, if_none_match: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(tag) = if_none_match {
        builder = builder.header(IF_NONE_MATCH, tag);
    }
    builder.body(Body::empty()).expect("request should build")
}

fn with_json(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be json")
}

fn etag(response: &Response) -> String {
    response
        .headers()
        .get(ETAG)
        .expect("etag header")
        .to_str()
        .expect("ascii etag")
        .to_string()
}

async fn create_ada(app: &Router) -> String {
    let response = send(
        app,
        with_json(
            Method::POST,
            "/users",
            json!({"name": "Ada", "email": "ada@example.com"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    etag(&response)
}

#[tokio::test]
async fn create_then_conditional_get() {
    let (app, _) = app();
    let created_tag = create_ada(&app).await;
    assert_eq!(created_tag, "\"user-1-v1\"");

    let response = send(&app, get("/users/1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(etag(&response), created_tag);
    assert_eq!(
        response.headers().get(CACHE_CONTROL).map(|v| v.as_bytes()),
        Some(&b"private, no-cache"[..])
    );
    let body = json_body(response).await;
    assert_eq!(body["name"], "Ada");
    assert_eq!(body["version"], 1);

    let response = send(&app, get("/users/1", Some(&created_tag))).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(etag(&response), created_tag);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn update_invalidates_and_returns_hint() {
    let (app, _) = app();
    let old_tag = create_ada(&app).await;

    let response = send(
        &app,
        with_json(Method::PUT, "/users/1", json!({"name": "Ada Lovelace"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CACHE_INVALIDATION_HEADER)
            .map(|v| v.as_bytes()),
        Some(&b"completed"[..])
    );
    let hint = etag(&response);
    assert_eq!(hint, "\"user-1-v2\"");
    assert_eq!(json_body(response).await["name"], "Ada Lovelace");

    let response = send(&app, get("/users/1", Some(&old_tag))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(etag(&response), hint);

    let response = send(&app, get("/users/1", Some(&hint))).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn update_reports_degraded_invalidation() {
    let (app, h) = app();
    create_ada(&app).await;
    h.backend.set_down(true);

    let response = send(
        &app,
        with_json(Method::PUT, "/users/1", json!({"email": "ada@lovelace.dev"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CACHE_INVALIDATION_HEADER)
            .map(|v| v.as_bytes()),
        Some(&b"degraded"[..])
    );
}

#[tokio::test]
async fn validation_and_missing_resources() {
    let (app, _) = app();
    create_ada(&app).await;

    let response = send(
        &app,
        with_json(
            Method::POST,
            "/users",
            json!({"name": "Other", "email": "ADA@example.com"}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(
        body["error"]["hint"]
            .as_str()
            .is_some_and(|hint| hint.contains("email"))
    );

    let response = send(
        &app,
        with_json(Method::PUT, "/users/1", json!({"email": "not-an-email"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, with_json(Method::PUT, "/users/1", json!([1, 2]))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "bad_request");

    let response = send(&app, get("/users/abc", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, get("/users/99", Some("*"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "not_found");

    let response = send(
        &app,
        with_json(Method::PUT, "/users/99", json!({"name": "Nobody"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let (app, _) = app();
    let tag = create_ada(&app).await;

    let response = send(&app, delete("/users/1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["invalidation"], "completed");

    let response = send(&app, get("/users/1", Some(&tag))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, delete("/users/1")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_users_paginates() {
    let (app, _) = app();
    for i in 0..3 {
        let response = send(
            &app,
            with_json(
                Method::POST,
                "/users",
                json!({"name": format!("User {i}"), "email": format!("u{i}@example.com")}),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = send(&app, get("/users?limit=2&offset=1", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 1);
    assert_eq!(body["users"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["users"][0]["id"], 2);

    let response = send(&app, get("/users?limit=0", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_report_outcomes() {
    let (app, _) = app();
    let tag = create_ada(&app).await;

    send(&app, get("/users/1", Some(&tag))).await;
    send(&app, get("/users/1", Some(&tag))).await;
    send(&app, get("/users/1", Some("\"stale\""))).await;
    send(
        &app,
        with_json(Method::PUT, "/users/1", json!({"name": "Ada L."})),
    )
    .await;

    let response = send(&app, get("/metrics", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["outcomes"]["hit"], 2);
    assert_eq!(body["outcomes"]["miss"], 1);
    assert_eq!(body["outcomes"]["write_invalidate"], 1);
    assert_eq!(body["outcomes"]["degraded_invalidate"], 0);
    assert_eq!(body["repository_reads_saved"], 2);
    assert_eq!(body["etag_strategy"], "version");
    assert_eq!(body["database"]["total_users"], 1);
    assert_eq!(body["cache"]["backend"], "switchable");
    assert_eq!(body["cache"]["connected"], true);
}

#[tokio::test]
async fn clear_cache_forces_misses() {
    let (app, h) = app();
    let tag = create_ada(&app).await;

    let response = send(&app, delete("/cache")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["removed"], 1);

    // Without a cached validator the engine consults the repository.
    let response = send(&app, get("/users/1", Some(&tag))).await;
    assert_eq!(response.status(), StatusCode::OK);

    h.backend.set_down(true);
    let response = send(&app, delete("/cache")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "cache_error");
}

#[tokio::test]
async fn health_ignores_cache_outage() {
    let (app, h) = app();

    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    h.backend.set_down(true);
    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["repository"], "ok");
    assert_eq!(body["cache"], "degraded");
}

#[tokio::test]
async fn get_fails_open_over_http() {
    let (app, h) = app();
    let tag = create_ada(&app).await;
    h.backend.set_down(true);

    let response = send(&app, get("/users/1", Some(&tag))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(etag(&response), tag);
    assert_eq!(json_body(response).await["email"], "ada@example.com");
}

#[tokio::test]
async fn metrics_summarize_served_reads() {
    let (app, _) = app();
    let tag = create_ada(&app).await;

    let full = send(&app, get("/users/1", Some("\"stale\""))).await;
    assert_eq!(full.status(), StatusCode::OK);
    let full_bytes = body_bytes(full).await.len() as u64;
    let response = send(&app, get("/users/1", Some(&tag))).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    send(&app, get("/users/1", Some(&tag))).await;
    // Not a user read; stays out of the request summary.
    send(&app, get("/users", None)).await;

    let body = json_body(send(&app, get("/metrics", None)).await).await;
    let requests = &body["requests"];
    assert_eq!(requests["total_requests"], 3);
    assert_eq!(requests["cache_hits"], 2);
    assert_eq!(requests["cache_misses"], 1);
    assert_eq!(requests["status_200"], 1);
    assert_eq!(requests["status_304"], 2);
    assert_eq!(requests["total_response_bytes"], full_bytes);
    assert_eq!(requests["bandwidth_saved_bytes"], 2 * full_bytes);
    assert_eq!(requests["repository_reads_saved"], 2);
    assert_eq!(requests["effectiveness"], "good");
}

#[tokio::test]
async fn recent_requests_are_newest_first() {
    let h = harness(EtagStrategy::Version);
    let state = HttpState::new(h.engine.clone(), Arc::new(MetricsObserver::new()))
        .with_request_log(RequestLog::new(4));
    let app = build_router(state);
    let tag = create_ada(&app).await;

    send(&app, get("/users/1", None)).await;
    send(&app, get("/users/1", Some(&tag))).await;
    send(&app, get("/users/7", None)).await;

    let response = send(&app, get("/metrics/recent", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let samples = body.as_array().expect("recent requests should be a list");
    // Not-found reads record no sample.
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0]["status"], 304);
    assert_eq!(samples[0]["cache_hit"], true);
    assert_eq!(samples[0]["endpoint"], "/users/1");
    assert_eq!(samples[1]["status"], 200);

    let body = json_body(send(&app, get("/metrics/recent?limit=1", None)).await).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let response = send(&app, get("/metrics/recent?limit=5", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = send(&app, get("/metrics/recent?limit=0", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reset_metrics_zeroes_tallies_and_history() {
    let (app, _) = app();
    let tag = create_ada(&app).await;
    send(&app, get("/users/1", Some(&tag))).await;

    let response = send(&app, delete("/metrics")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let body = json_body(send(&app, get("/metrics", None)).await).await;
    assert_eq!(body["outcomes"]["hit"], 0);
    assert_eq!(body["requests"]["total_requests"], 0);
    assert_eq!(body["requests"]["effectiveness"], "unknown");
    let body = json_body(send(&app, get("/metrics/recent", None)).await).await;
    assert_eq!(body.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn malformed_version_is_a_server_error() {
    let h = harness_over(EtagStrategy::Version, Arc::new(ZeroVersionUsers::default()));
    let state = HttpState::new(h.engine.clone(), Arc::new(MetricsObserver::new()));
    let app = build_router(state);
    create_ada(&app).await;
    send(&app, delete("/cache")).await;

    let response = send(&app, get("/users/1", None)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "generation_error");
    assert!(h.engine.store().get(&ResourceKey::user(1)).await.is_none());
}
