use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{query::QueryError, repository::RepoError};

/// AccessError
///
/// Every failure a request can end in. None of them is retried and none is fatal to
/// the process; each maps to exactly one status code.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AccessError::Forbidden(_) => StatusCode::FORBIDDEN,
            AccessError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AccessError::NotFound => StatusCode::NOT_FOUND,
            AccessError::Conflict(_) => StatusCode::CONFLICT,
            AccessError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            // Storage details stay in the logs.
            AccessError::Internal(detail) => {
                tracing::error!("request failed: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

impl From<RepoError> for AccessError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Conflict(detail) => AccessError::Conflict(detail),
            RepoError::Query(QueryError::UnknownField(field)) => {
                AccessError::BadRequest(format!("cannot filter on {field}"))
            }
            RepoError::Query(other) => AccessError::BadRequest(other.to_string()),
            RepoError::Database(detail) => AccessError::Internal(detail),
        }
    }
}
