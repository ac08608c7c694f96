//! Error types for the Campus API client.
//!
//! Every failure the client can report is an [`ApiError`]. Server-reported
//! conditions carry their HTTP status; transport failures report status `0`.
//! The type is `Clone` so a single refresh failure can be handed to every
//! caller queued behind it.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// A specialized `Result` type for Campus client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Fallback message used when an error response carries no readable body.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred";

/// Errors that can occur while talking to the Campus API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    // ========================================================================
    // Server-reported errors
    // ========================================================================
    /// The server rejected the request payload (400 or 422).
    #[error("Validation failed ({status}): {message}")]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    /// The credentials were missing, expired, or rejected (401).
    #[error("Authentication required: {message}\n\nSuggestion: Log in again to obtain a new access token")]
    Authentication {
        /// Message from the error body.
        message: String,
    },

    /// The caller is authenticated but not allowed to do this (403).
    #[error("Not authorized: {message}")]
    Authorization {
        /// Message from the error body.
        message: String,
    },

    /// The requested resource does not exist (404).
    #[error("Not found: {message}")]
    NotFound {
        /// Message from the error body.
        message: String,
    },

    /// The server failed to handle the request (5xx).
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    // ========================================================================
    // Transport errors (status 0)
    // ========================================================================
    /// The request never produced an HTTP response, or its body was unreadable.
    #[error("Network error: {message}\n\nSuggestion: Check your connection and the configured base URL")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The request could not be built (bad URL, header, or body).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    // ========================================================================
    // Local state errors
    // ========================================================================
    /// The token store could not be read or written.
    #[error("Token store error at '{path}': {message}\n\nSuggestion: Remove the session file and log in again")]
    TokenStore {
        /// Location of the backing store.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Invalid JSON in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your campus.json with a JSON linter")]
    ConfigParse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },
}

impl ApiError {
    /// Maps an HTTP status and message onto the matching variant.
    ///
    /// ```
    /// use campus_client::ApiError;
    ///
    /// let err = ApiError::from_status(422, "email is required");
    /// assert!(matches!(err, ApiError::Validation { .. }));
    /// assert_eq!(err.status(), 422);
    /// ```
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => Self::Validation { status, message },
            401 => Self::Authentication { message },
            403 => Self::Authorization { message },
            404 => Self::NotFound { message },
            500..=599 => Self::Server { status, message },
            _ => Self::Http { status, message },
        }
    }

    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `TokenStore` error.
    #[must_use]
    pub fn token_store(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::TokenStore {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigParse` error.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidation` error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Converts a `reqwest` failure into the transport variants.
    pub(crate) fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout }
        } else if err.is_builder() {
            Self::invalid_request(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }

    /// Returns the HTTP status for server-reported errors, `0` otherwise.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Validation { status, .. }
            | Self::Server { status, .. }
            | Self::Http { status, .. } => *status,
            Self::Authentication { .. } => 401,
            Self::Authorization { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::InvalidRequest { .. }
            | Self::TokenStore { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigValidation { .. } => 0,
        }
    }

    /// Returns `true` if the server rejected the caller's credentials.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if the same request may succeed when tried again later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Server { .. }
        )
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::network(format!("failed to decode response: {err}"))
    }
}
