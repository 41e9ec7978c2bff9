//! HTTP surface: user resources with entity-tag validators plus operational endpoints.

mod error;
mod handlers;
mod middleware;
mod models;
mod state;

pub use error::{ApiError, codes};
pub use handlers::CACHE_INVALIDATION_HEADER;
pub use middleware::REQUEST_ID_HEADER;
pub use state::HttpState;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::repos::UsersRepo;

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/metrics",
            get(handlers::metrics).delete(handlers::reset_metrics),
        )
        .route("/metrics/recent", get(handlers::recent_requests))
        .route("/cache", delete(handlers::clear_cache))
        .route("/health", get(health))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::record_user_reads,
        ))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

#[derive(Debug, Serialize)]
struct HealthReport {
    repository: &'static str,
    cache: &'static str,
}

/// Repository health decides the status; the cache is reported for operators
/// but never fails the check since reads stay correct without it.
async fn health(State(state): State<HttpState>) -> Response {
    let repository = state.engine.repository().health_check().await;
    let cache = state.engine.store().health().await;
    let report = HealthReport {
        repository: if repository.is_ok() { "ok" } else { "unavailable" },
        cache: if cache.is_ok() { "ok" } else { "degraded" },
    };

    match repository {
        Ok(()) if cache.is_ok() => StatusCode::NO_CONTENT.into_response(),
        Ok(()) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => {
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
