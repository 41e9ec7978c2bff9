use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::application::coherence::{
    CreateOutcome, Invalidation, Mutation, ReadOutcome, WriteOutcome,
};
use crate::application::repos::UsersRepo;
use crate::domain::users::{NewUser, UserPatch};
use crate::domain::validator::{ConditionalTokens, Validator};

use crate::infra::metrics::RequestSample;

use super::error::ApiError;
use super::middleware::ServedRead;
use super::models::{
    CacheClearedResponse, DatabaseMetrics, MetricsResponse, RecentRequestsQuery,
    UserDeletedResponse, UserListQuery, UserListResponse,
};
use super::state::HttpState;

pub const CACHE_INVALIDATION_HEADER: HeaderName = HeaderName::from_static("x-cache-invalidation");

/// Clients may store the representation but must revalidate before reuse.
const USER_CACHE_CONTROL: HeaderValue = HeaderValue::from_static("private, no-cache");

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1_000;
const DEFAULT_RECENT_LIMIT: usize = 10;

fn user_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    let Path(id) = path.map_err(|rejection| {
        ApiError::bad_request("Invalid user id", Some(rejection.body_text()))
    })?;
    Ok(id)
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let Json(value) = body.map_err(|rejection| {
        ApiError::bad_request("Invalid request body", Some(rejection.body_text()))
    })?;
    Ok(value)
}

fn validator_headers(validator: &Validator) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(validator.as_str()) {
        Ok(value) => {
            headers.insert(ETAG, value);
        }
        Err(err) => {
            warn!(validator = %validator, error = %err, "validator is not a valid header value")
        }
    }
    headers.insert(CACHE_CONTROL, USER_CACHE_CONTROL);
    headers
}

fn invalidation_header(invalidation: Invalidation) -> (HeaderName, HeaderValue) {
    (
        CACHE_INVALIDATION_HEADER,
        HeaderValue::from_static(invalidation.as_str()),
    )
}

pub async fn get_user(
    State(state): State<HttpState>,
    path: Result<Path<i64>, PathRejection>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = user_id(path)?;
    let tokens = ConditionalTokens::from_header_values(
        headers
            .get_all(IF_NONE_MATCH)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );

    let (mut response, cache_hit) = match state.engine.read(id, &tokens).await? {
        ReadOutcome::NotModified { validator } => (
            (StatusCode::NOT_MODIFIED, validator_headers(&validator)).into_response(),
            true,
        ),
        ReadOutcome::Full { record, validator } => (
            (StatusCode::OK, validator_headers(&validator), Json(record)).into_response(),
            false,
        ),
        ReadOutcome::NotFound => return Err(ApiError::not_found("user not found")),
    };
    response.extensions_mut().insert(ServedRead { cache_hit });
    Ok(response)
}

pub async fn list_users(
    State(state): State<HttpState>,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> Result<Json<UserListResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("Invalid query parameters", Some(rejection.body_text()))
    })?;

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(ApiError::bad_request(
            "Invalid limit",
            Some(format!("limit must be between 1 and {MAX_LIST_LIMIT}")),
        ));
    }
    let offset = query.offset.unwrap_or(0);

    let page = state.engine.repository().page(limit, offset).await?;

    Ok(Json(UserListResponse {
        users: page.items,
        total: page.total,
        limit,
        offset,
    }))
}

pub async fn create_user(
    State(state): State<HttpState>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = json_body(body)?;

    match state.engine.create(user).await? {
        CreateOutcome::Created { record, validator } => Ok((
            StatusCode::CREATED,
            validator_headers(&validator),
            Json(record),
        )
            .into_response()),
        CreateOutcome::Rejected(err) => Err(err.into()),
    }
}

pub async fn update_user(
    State(state): State<HttpState>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<UserPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = user_id(path)?;
    let patch = json_body(body)?;

    match state.engine.write(id, Mutation::Update(patch)).await? {
        WriteOutcome::Applied {
            record,
            validator_hint,
            invalidation,
        } => {
            let mut headers = validator_hint
                .as_ref()
                .map(validator_headers)
                .unwrap_or_default();
            let (name, value) = invalidation_header(invalidation);
            headers.insert(name, value);
            Ok((StatusCode::OK, headers, Json(record)).into_response())
        }
        WriteOutcome::NotFound => Err(ApiError::not_found("user not found")),
        WriteOutcome::Rejected(err) => Err(err.into()),
    }
}

pub async fn delete_user(
    State(state): State<HttpState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let id = user_id(path)?;

    match state.engine.write(id, Mutation::Delete).await? {
        WriteOutcome::Applied { invalidation, .. } => Ok((
            StatusCode::OK,
            [invalidation_header(invalidation)],
            Json(UserDeletedResponse {
                message: "User deleted successfully",
                id,
                invalidation: invalidation.as_str(),
            }),
        )
            .into_response()),
        WriteOutcome::NotFound => Err(ApiError::not_found("user not found")),
        WriteOutcome::Rejected(err) => Err(err.into()),
    }
}

pub async fn metrics(State(state): State<HttpState>) -> Json<MetricsResponse> {
    let outcomes = state.metrics.snapshot();
    let total_users = state
        .engine
        .repository()
        .count()
        .await
        .inspect_err(|err| warn!(error = %err, "user count unavailable for metrics"))
        .ok();

    Json(MetricsResponse {
        outcomes,
        requests: state.requests.summary(),
        repository_reads_saved: outcomes.hit,
        etag_strategy: state.engine.generator().strategy().as_str(),
        database: DatabaseMetrics { total_users },
        cache: state.engine.store().stats().await,
    })
}

pub async fn clear_cache(
    State(state): State<HttpState>,
) -> Result<Json<CacheClearedResponse>, ApiError> {
    let removed = state
        .engine
        .store()
        .clear()
        .await
        .map_err(|err| ApiError::cache_unavailable(err.to_string()))?;
    Ok(Json(CacheClearedResponse { removed }))
}

pub async fn recent_requests(
    State(state): State<HttpState>,
    query: Result<Query<RecentRequestsQuery>, QueryRejection>,
) -> Result<Json<Vec<RequestSample>>, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("Invalid query parameters", Some(rejection.body_text()))
    })?;

    let capacity = state.requests.capacity();
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    if limit == 0 || limit > capacity {
        return Err(ApiError::bad_request(
            "Invalid limit",
            Some(format!("limit must be between 1 and {capacity}")),
        ));
    }

    Ok(Json(state.requests.recent(limit)))
}

/// Zero outcome tallies and drop request history.
pub async fn reset_metrics(State(state): State<HttpState>) -> StatusCode {
    state.metrics.reset();
    state.requests.reset();
    StatusCode::NO_CONTENT
}
