//! Application error types.
//!
//! Every component returns `AppError`. The chat command layer renders these
//! errors as plain text, and the HTTP layer turns them into status codes.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors.
///
/// All variants serialize to a structured JSON object so the chat bridge can
/// return them to HTTP callers.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// GitLab API request failed.
    #[error("GitLab API error: {message}")]
    GitLabApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// Network request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Requested resource not found.
    #[error("{resource} not found.")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The user lacks the access level required for the action, or it could
    /// not be determined.
    #[error("{message}")]
    PermissionDenied { message: String },

    /// A record changed between lookup and update.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Inbound webhook body could not be decoded.
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    /// Configuration is missing or unreadable.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Message shown when a user may not be assigned to an item.
pub const PERMISSION_DENIED_MESSAGE: &str = "Nice try but you don't have the correct permission.";

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a GitLab API error.
    pub fn gitlab_api(message: impl Into<String>) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a GitLab API error with status code and endpoint.
    pub fn gitlab_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::GitLabApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a permission error with the standard message.
    pub fn permission_denied() -> Self {
        Self::PermissionDenied {
            message: PERMISSION_DENIED_MESSAGE.to_string(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a malformed payload error.
    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error for a required setting that is absent.
    pub fn config_missing(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::Config {
            message: format!("{} conf parameter must be set.", field),
            field: Some(field),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status returned by GitLab, if this error came from an API response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::GitLabApi { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Whether GitLab refused the request with 403 Forbidden.
    pub fn is_forbidden(&self) -> bool {
        self.status_code() == Some(403)
    }

    /// Whether this is a permission error.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else if err.is_status() {
            Self::gitlab_api(format!("HTTP error: {}", err))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed_payload(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// `DbError` only comes out of opening and migrating the database.
impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database_with_op(err.to_string(), "initialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = AppError::database("connection failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Database\""));
        assert!(json.contains("connection failed"));
        assert!(!json.contains("operation"));
    }

    #[test]
    fn test_gitlab_api_error_full() {
        let err = AppError::gitlab_api_full("Access denied", 403, "/projects/4/hooks");
        assert!(err.is_forbidden());
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"status_code\":403"));
        assert!(json.contains("/projects/4/hooks"));
    }

    #[test]
    fn test_permission_denied_is_verbatim() {
        let err = AppError::permission_denied();
        assert!(err.is_permission_denied());
        assert_eq!(
            err.to_string(),
            "Nice try but you don't have the correct permission."
        );
    }

    #[test]
    fn test_config_missing_names_field() {
        let err = AppError::config_missing("gitlab.token");
        assert_eq!(
            err.to_string(),
            "Configuration error: gitlab.token conf parameter must be set."
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"field\":\"gitlab.token\""));
    }

    #[test]
    fn test_not_found_display() {
        let err = AppError::not_found_with_id("User alice", "alice");
        assert_eq!(err.to_string(), "User alice not found.");
        assert!(!err.is_forbidden());
    }

    #[test]
    fn test_db_error_records_operation() {
        let err = AppError::from(crate::db::DbError::Migration("0001: boom".to_string()));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"operation\":\"initialize\""));
        assert!(err.to_string().contains("0001: boom"));
    }
}
