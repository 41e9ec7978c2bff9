use std::time::Instant;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderName, HeaderValue, Request,
        header::{CONTENT_LENGTH, ETAG},
    },
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::infra::metrics::RequestSample;

use super::handlers::CACHE_INVALIDATION_HEADER;
use super::state::HttpState;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Tag each request with an id, echoed back in `x-request-id`.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Marks a response as a served user read and whether the cache answered it.
#[derive(Debug, Clone, Copy)]
pub struct ServedRead {
    pub cache_hit: bool,
}

/// Time user reads and feed them to the request log. Other responses pass through.
pub async fn record_user_reads(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(served) = response.extensions().get::<ServedRead>().copied() {
        let response_bytes = response.body().size_hint().exact().unwrap_or_else(|| {
            response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
                .unwrap_or(0)
        });
        state.requests.record(RequestSample::new(
            endpoint,
            start.elapsed(),
            served.cache_hit,
            response.status().as_u16(),
            response_bytes,
        ));
    }

    response
}

fn header_text(response: &Response, name: &HeaderName) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if !status.is_client_error() && !status.is_server_error() {
        debug!(
            target = "etagger::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = start.elapsed().as_millis(),
            etag = %header_text(&response, &ETAG),
            invalidation = %header_text(&response, &CACHE_INVALIDATION_HEADER),
            request_id = request_id,
            "request served",
        );
    } else {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "etagger::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "etagger::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}
