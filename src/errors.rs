//! # Query Errors
//!
//! Every failure the adapter can produce while turning a request into a query.
//!
//! Parsing and compilation failures (`UnsupportedOperator`, `TypeMismatch`,
//! `UnsupportedDepth`, `InvalidTimezone`, ...) are raised before any statement is
//! sent to the storage layer. Storage failures are propagated unchanged inside
//! [`QueryError::Database`] and are only logged, never echoed to clients.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use adminlens::QueryError;
//!
//! async fn list_users(...) -> Result<Json<Value>, QueryError> {
//!     let (count, rows) = ResourcesGetter::new(&registry, "user", &params, &config)?
//!         .perform(&db)
//!         .await?;
//!     Ok(Json(json!([count, rows])))
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::filtering::conditions::Operator;
use crate::schema::SemanticType;

/// Error raised while building or running an admin query
#[derive(Debug)]
pub enum QueryError {
    /// The column's native type has no semantic counterpart. The field is left
    /// out of the schema and cannot be filtered or sorted on.
    UnsupportedFieldType {
        collection: String,
        field: String,
        native_type: String,
    },

    /// The operator is illegal for the field's semantic type
    UnsupportedOperator {
        field: String,
        raw: String,
        operator: Operator,
        field_type: SemanticType,
    },

    /// The operand cannot be coerced to the field's semantic type
    TypeMismatch {
        field: String,
        raw: String,
        expected: SemanticType,
    },

    /// Field path goes further than one association
    UnsupportedDepth { path: String },

    /// Not a known IANA timezone identifier
    InvalidTimezone { timezone: String },

    UnknownCollection { collection: String },

    UnknownField { collection: String, field: String },

    UnknownAssociation {
        collection: String,
        association: String,
    },

    /// Malformed request parameters (pagination, record id, stat shape)
    InvalidRequest { message: String },

    /// Startup validation of the collection registry failed
    InvalidRegistry { message: String },

    /// The storage layer did not answer before the request deadline.
    /// Safe to retry.
    Timeout { after: Duration },

    /// Storage error (details logged, not exposed)
    Database { internal: DbErr },
}

impl QueryError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_registry(message: impl Into<String>) -> Self {
        Self::InvalidRegistry {
            message: message.into(),
        }
    }

    pub fn unknown_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    pub fn type_mismatch(field: &str, raw: &str, expected: SemanticType) -> Self {
        Self::TypeMismatch {
            field: field.to_string(),
            raw: raw.to_string(),
            expected,
        }
    }

    pub fn unsupported_operator(
        field: &str,
        raw: &str,
        operator: Operator,
        field_type: SemanticType,
    ) -> Self {
        Self::UnsupportedOperator {
            field: field.to_string(),
            raw: raw.to_string(),
            operator,
            field_type,
        }
    }

    /// Whether the caller may retry the same request unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedFieldType { .. }
            | Self::UnsupportedOperator { .. }
            | Self::TypeMismatch { .. }
            | Self::UnsupportedDepth { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidTimezone { .. }
            | Self::UnknownField { .. }
            | Self::UnknownAssociation { .. }
            | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownCollection { .. } => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRegistry { .. } | Self::Database { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// User-facing message. Storage details are never included.
    fn user_message(&self) -> String {
        match self {
            Self::UnsupportedFieldType {
                collection,
                field,
                native_type,
            } => format!(
                "Field '{collection}.{field}' has unsupported type {native_type} and cannot be queried"
            ),
            Self::UnsupportedOperator {
                field,
                raw,
                operator,
                field_type,
            } => format!(
                "Operator '{operator}' is not supported on {field_type} field '{field}' (condition '{raw}')"
            ),
            Self::TypeMismatch {
                field,
                raw,
                expected,
            } => format!("Value '{raw}' for field '{field}' is not a valid {expected}"),
            Self::UnsupportedDepth { path } => {
                format!("Field path '{path}' goes deeper than one association")
            }
            Self::InvalidTimezone { timezone } => format!("Unknown timezone '{timezone}'"),
            Self::UnknownCollection { collection } => {
                format!("Collection '{collection}' not found")
            }
            Self::UnknownField { collection, field } => {
                format!("Collection '{collection}' has no field '{field}'")
            }
            Self::UnknownAssociation {
                collection,
                association,
            } => format!("Collection '{collection}' has no association '{association}'"),
            Self::InvalidRequest { message } => message.clone(),
            Self::InvalidRegistry { .. } => "Collection registry is misconfigured".to_string(),
            Self::Timeout { after } => {
                format!("Query did not complete within {}ms", after.as_millis())
            }
            Self::Database { .. } => "A database error occurred".to_string(),
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Database { internal } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::InvalidRegistry { message } => {
                tracing::error!(details = %message, "Invalid collection registry");
            }
            Self::Timeout { after } => {
                tracing::warn!(after_ms = %after.as_millis(), "Query timed out");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "Rejected admin query"
                );
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        self.log_internal();
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRegistry { message } => write!(f, "invalid registry: {message}"),
            Self::Database { internal } => write!(f, "database error: {internal}"),
            _ => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database { internal } => Some(internal),
            _ => None,
        }
    }
}

impl From<DbErr> for QueryError {
    fn from(internal: DbErr) -> Self {
        Self::Database { internal }
    }
}
