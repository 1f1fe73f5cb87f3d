use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors raised by the Postgres and in-memory repositories of the services.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("transaction {command} failed with: {error}")]
    TransactionError { command: String, error: sqlx::Error },
    #[error("{0}")]
    Conflict(String),
    #[error("database unavailable: {0}")]
    Unavailable(String),
}

impl DatabaseError {
    pub fn query(command: &str) -> impl FnOnce(sqlx::Error) -> DatabaseError + '_ {
        move |error| DatabaseError::QueryError {
            command: command.to_owned(),
            error,
        }
    }

    pub fn transaction(command: &str) -> impl FnOnce(sqlx::Error) -> DatabaseError + '_ {
        move |error| DatabaseError::TransactionError {
            command: command.to_owned(),
            error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

/// Error returned by HTTP handlers. Internal details are logged, never sent to the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    /// Log `err` with `context` and hide it behind a generic 500.
    pub fn internal(context: &str, err: impl fmt::Display) -> Self {
        error!("{}: {}", context, err);
        ApiError::Internal
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(msg) => ApiError::Conflict(msg),
            err => ApiError::internal("database error", err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
