//! Error Types for MARKETCACHE API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marketcache_core::{BridgeError, CacheError, ConfigError, MarketError, RecordError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Record failed structural validation
    MalformedRecord,

    /// Field value is out of valid range
    InvalidRange,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// No record cached for the requested symbol
    SymbolNotFound,

    /// Requested view could not be served or computed
    ViewNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Incoming record is older than the stored one
    StaleWrite,

    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Server Errors (500, 503, 504)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Every cache tier rejected the operation
    CacheUnavailable,

    /// Neither the optimized nor the legacy path could serve the request
    ServiceUnavailable,

    /// Operation timed out
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MalformedRecord
            | ErrorCode::InvalidRange => StatusCode::BAD_REQUEST,

            ErrorCode::SymbolNotFound | ErrorCode::ViewNotFound => StatusCode::NOT_FOUND,

            ErrorCode::StaleWrite | ErrorCode::StateConflict => StatusCode::CONFLICT,

            ErrorCode::CacheUnavailable | ErrorCode::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MalformedRecord => "Record is malformed",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::SymbolNotFound => "Symbol not found",
            ErrorCode::ViewNotFound => "View not available",
            ErrorCode::StaleWrite => "Record is older than the stored one",
            ErrorCode::StateConflict => "Operation conflicts with current state",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::CacheUnavailable => "Cache unavailable",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an InvalidRange error.
    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
    }

    /// Create a SymbolNotFound error.
    pub fn symbol_not_found(symbol: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SymbolNotFound,
            format!("No record cached for symbol {}", symbol),
        )
    }

    /// Create a ViewNotFound error.
    pub fn view_not_found(view: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ViewNotFound,
            format!("View {} has no data", view),
        )
    }

    /// Create a StateConflict error.
    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    /// Create a Timeout error.
    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::AllTiersUnavailable { .. }
            | CacheError::TierUnavailable { .. }
            | CacheError::CircuitOpen { .. } => {
                ApiError::new(ErrorCode::CacheUnavailable, err.to_string())
            }
            CacheError::Timeout { .. } => ApiError::new(ErrorCode::Timeout, err.to_string()),
            CacheError::Encoding { .. } | CacheError::Decoding { .. } => {
                tracing::error!(error = %err, "Cache payload error");
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match &err {
            RecordError::Malformed { .. } => {
                ApiError::new(ErrorCode::MalformedRecord, err.to_string())
            }
            RecordError::StaleWrite {
                incoming, stored, ..
            } => ApiError::new(ErrorCode::StaleWrite, err.to_string()).with_details(
                serde_json::json!({
                    "incoming": incoming,
                    "stored": stored,
                }),
            ),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match &err {
            ConfigError::InvalidValue { field, .. } if field == "percentage" => {
                ApiError::invalid_range("percentage", 0, 100)
            }
            _ => ApiError::validation_failed(err.to_string()),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NoData { view } => ApiError::view_not_found(view),
            BridgeError::DeadlineExceeded { .. } => ApiError::timeout("refresh"),
            BridgeError::Cache(e) => e.into(),
        }
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        match err {
            MarketError::Cache(e) => e.into(),
            MarketError::Record(e) => e.into(),
            MarketError::Config(e) => e.into(),
            MarketError::Bridge(e) => e.into(),
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
