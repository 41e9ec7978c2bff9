use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::coherence::CoherenceError;
use crate::application::error::ErrorReport;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const VALIDATION: &str = "validation_error";
    pub const GENERATION: &str = "generation_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const CACHE: &str = "cache_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    /// Diagnostic detail for the logs only; never sent to the client.
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn validation(err: DomainError) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::VALIDATION,
            "Validation failed",
            Some(err.to_string()),
        )
    }

    pub fn cache_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::CACHE,
            "Validator cache unavailable",
            None,
        )
        .with_detail(detail)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { .. } => Self::validation(err),
            DomainError::Invariant { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "Unexpected error occurred",
                None,
            )
            .with_detail(err.to_string()),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::not_found("user not found"),
            RepoError::Duplicate { .. } | RepoError::InvalidInput { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::VALIDATION,
                "Validation failed",
                Some(err.to_string()),
            ),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                None,
            ),
            RepoError::Persistence(message) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                None,
            )
            .with_detail(message),
        }
    }
}

impl From<CoherenceError> for ApiError {
    fn from(err: CoherenceError) -> Self {
        match err {
            CoherenceError::Repository(err) => err.into(),
            CoherenceError::Generation(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::GENERATION,
                "Validator could not be generated",
                None,
            )
            .with_detail(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self
            .detail
            .clone()
            .or_else(|| self.hint.clone())
            .unwrap_or_else(|| self.message.to_string());
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {detail}", self.code),
        )
        .attach(&mut response);
        response
    }
}
