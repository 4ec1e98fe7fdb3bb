// ABOUTME: Centralized error handling and error types for the council server
// ABOUTME: Defines the closed error-code set shared by the store, orchestrator, and HTTP layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Council Arena

//! # Unified Error Handling
//!
//! A single `AppError` type carries a closed [`ErrorCode`] set across every
//! module. Store and orchestrator code construct errors through the helper
//! constructors; the HTTP layer maps codes onto status lines via
//! [`ErrorCode::http_status`].

use std::fmt::{self, Display};

use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error as ThisError;
use tracing::warn;

/// Standard error codes used throughout the application
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// Static validation of an admission request failed
    InvalidRequest,
    /// Missing or invalid bearer credential
    Unauthorized,
    /// A referenced session or entity does not exist
    NotFound,
    /// Store-level invariant violation (illegal transition, duplicate row)
    Conflict,
    /// A single streaming provider call failed or timed out
    ProviderFailure,
    /// Every participant failed in a stage, or synthesis failed
    StageFailure,
    /// I/O fault against the store
    Transient,
    /// Explicit cancellation
    Cancelled,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Conflict | Self::Cancelled => 409,
            Self::ProviderFailure => 502,
            Self::StageFailure => 500,
            Self::Transient => 503,
        }
    }

    /// Get a user-facing description of this error code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidRequest => "The request failed validation",
            Self::Unauthorized => "Authentication credentials are missing or invalid",
            Self::NotFound => "The requested resource was not found",
            Self::Conflict => "The operation conflicts with the current state",
            Self::ProviderFailure => "A model provider call failed",
            Self::StageFailure => "A council stage could not complete",
            Self::Transient => "A transient storage fault occurred",
            Self::Cancelled => "The operation was cancelled",
        }
    }
}

/// Application error with a code and a human-readable message
#[derive(Debug, Clone, ThisError)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl AppError {
    /// Create a new error with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Static validation failure at admission
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Missing or invalid credentials
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Referenced entity does not exist
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorCode::NotFound, format!("{resource} not found"))
    }

    /// Store-level invariant violation
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// A single provider stream failed or timed out
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderFailure, message)
    }

    /// A whole stage failed; terminal for the session
    #[must_use]
    pub fn stage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StageFailure, message)
    }

    /// I/O fault against the store
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transient, message)
    }

    /// Explicit cancellation
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "session cancelled")
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Whether this error terminates a session (as opposed to degrading one
    /// participant's contribution)
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::StageFailure | ErrorCode::Transient | ErrorCode::Cancelled
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::new(ErrorCode::NotFound, "row not found"),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::new(ErrorCode::Conflict, format!("unique constraint: {db}"))
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::new(ErrorCode::Conflict, format!("foreign key constraint: {db}"))
            }
            _ => Self::new(ErrorCode::Transient, format!("database error: {err}")),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Transient, format!("serialization error: {err}"))
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// RFC3339 timestamp when the error occurred
    pub timestamp: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        warn!("API error: {:?}: {}", error.code, error.message);

        Self {
            code: error.code,
            message: error.message,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(ErrorCode::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
        assert_eq!(ErrorCode::NotFound.http_status(), 404);
        assert_eq!(ErrorCode::Conflict.http_status(), 409);
        assert_eq!(ErrorCode::ProviderFailure.http_status(), 502);
        assert_eq!(ErrorCode::Transient.http_status(), 503);
    }

    #[test]
    fn terminal_classification() {
        assert!(AppError::stage("all failed").is_terminal());
        assert!(AppError::transient("disk").is_terminal());
        assert!(AppError::cancelled().is_terminal());
        assert!(!AppError::provider("one stream").is_terminal());
        assert!(!AppError::conflict("dup").is_terminal());
    }

    #[test]
    fn not_found_formats_resource() {
        let err = AppError::not_found("session 42");
        assert_eq!(err.message, "session 42 not found");
    }
}
