//! Domain error types for server operations.
//!
//! [`ServerError`] covers process setup and is reported through rootcause
//! from `main`. [`ApiError`] covers request handling and turns into a
//! user-safe HTTP response; the details are logged, never returned.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Errors raised while bringing the server up.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration was missing or invalid.
    Config { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Schema migrations failed.
    Migration { details: String },
    /// The NATS connection or JetStream setup failed.
    Messaging { details: String },
    /// The outbound HTTP client could not be built.
    HttpClient { details: String },
    /// The listener could not bind.
    Bind { addr: String, details: String },
    /// The HTTP server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "database migration failed: {details}"),
            Self::Messaging { details } => write!(f, "messaging setup failed: {details}"),
            Self::HttpClient { details } => write!(f, "http client setup failed: {details}"),
            Self::Bind { addr, details } => write!(f, "failed to bind {addr}: {details}"),
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// Errors returned from HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    /// A required query parameter was absent.
    MissingParameter { name: &'static str },
    /// A query parameter was present but out of range or not a number.
    InvalidParameter { name: &'static str, reason: String },
    /// A path or query id did not parse.
    InvalidId { id: String, reason: String },
    /// The request body was not valid JSON.
    InvalidBody { reason: String },
    /// The workflow does not exist.
    WorkflowNotFound { id: String },
    /// No run has this correlation id.
    ExecutionNotFound { id: String },
    /// The workflow exists but has no node able to take this trigger.
    TriggerNotConfigured { id: String, node_type: &'static str },
    /// The workflow store failed.
    Store { details: String },
    /// The run could not be handed to the engine.
    Dispatch { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameter { name } => write!(f, "missing query parameter '{name}'"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid query parameter '{name}': {reason}")
            }
            Self::InvalidId { id, reason } => write!(f, "invalid id '{id}': {reason}"),
            Self::InvalidBody { reason } => write!(f, "invalid request body: {reason}"),
            Self::WorkflowNotFound { id } => write!(f, "workflow '{id}' not found"),
            Self::ExecutionNotFound { id } => write!(f, "execution '{id}' not found"),
            Self::TriggerNotConfigured { id, node_type } => {
                write!(f, "workflow '{id}' has no {node_type} node")
            }
            Self::Store { details } => write!(f, "workflow store error: {details}"),
            Self::Dispatch { details } => write!(f, "run dispatch error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidId { .. }
            | Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::WorkflowNotFound { .. }
            | Self::ExecutionNotFound { .. }
            | Self::TriggerNotConfigured { .. } => StatusCode::NOT_FOUND,
            Self::Store { .. } | Self::Dispatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to callers.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingParameter { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidId { .. }
            | Self::InvalidBody { .. } => self.to_string(),
            Self::WorkflowNotFound { .. } | Self::TriggerNotConfigured { .. } => {
                "Workflow not found".to_string()
            }
            Self::ExecutionNotFound { .. } => "Execution not found".to_string(),
            Self::Store { .. } => "Database error".to_string(),
            Self::Dispatch { .. } => "Failed to start run".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            ApiError::MissingParameter { name: "workflowId" }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TriggerNotConfigured {
                id: "wf_1".to_string(),
                node_type: "WEBHOOK",
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ExecutionNotFound {
                id: "run_1".to_string(),
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn server_errors_hide_details() {
        let err = ApiError::Store {
            details: "connection reset by peer".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("connection reset"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn setup_errors_name_the_failing_piece() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:3000".to_string(),
            details: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:3000"));
    }
}
