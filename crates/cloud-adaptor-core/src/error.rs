// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for cloud-adaptor-core.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the persistence layer and the event sink.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Entity was not found.
    NotFound {
        /// Entity kind, e.g. `"task"`.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Entity already exists under its unique key.
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// The conflicting identifier.
        id: String,
    },

    /// A stored or supplied value failed validation.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A JSON or YAML column could not be encoded or decoded.
    SerializationError {
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Shorthand for [`CoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::SerializationError { .. } => "SERIALIZATION_ERROR",
        }
    }

    /// Whether this is a [`CoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{} '{}' not found", entity, id),
            Self::AlreadyExists { entity, id } => {
                write!(f, "{} '{}' already exists", entity, id)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::SerializationError { details } => write!(f, "Serialization error: {}", details),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && db.is_unique_violation()
        {
            return CoreError::AlreadyExists {
                entity: "row",
                id: db.message().to_string(),
            };
        }
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError {
            details: err.to_string(),
        }
    }
}

impl From<crate::model::ParseEnumError> for CoreError {
    fn from(err: crate::model::ParseEnumError) -> Self {
        CoreError::SerializationError {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_and_code() {
        let err = CoreError::not_found("task", "abc");
        assert_eq!(err.to_string(), "task 'abc' not found");
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let err: CoreError = serde_json::from_str::<Vec<String>>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
