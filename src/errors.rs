use http::StatusCode;
use sea_orm::error::{DbErr, RuntimeErr, SqlErr};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(
        "Insufficient stock for product {product_id} in warehouse {warehouse_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: Uuid,
        warehouse_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid state: {entity} is {current}, cannot {attempted}")]
    InvalidState {
        entity: String,
        current: String,
        attempted: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn invalid_state(
        entity: impl Into<String>,
        current: impl Into<String>,
        attempted: impl Into<String>,
    ) -> Self {
        ServiceError::InvalidState {
            entity: entity.into(),
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    /// True when the error came from a unique index rejecting an insert.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            ServiceError::DatabaseError(err)
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        )
    }

    /// Lock contention, a serialization failure or a deadlock reported by
    /// the database, or a pool that had no free connection.
    pub fn is_transient_conflict(&self) -> bool {
        let ServiceError::DatabaseError(err) = self else {
            return false;
        };
        match err {
            DbErr::ConnectionAcquire(_) => true,
            DbErr::Conn(RuntimeErr::SqlxError(e))
            | DbErr::Exec(RuntimeErr::SqlxError(e))
            | DbErr::Query(RuntimeErr::SqlxError(e)) => e
                .as_database_error()
                .and_then(|db| db.code())
                .map_or(false, |code| is_transient_code(&code)),
            _ => false,
        }
    }

    /// Errors that are resolved by re-running the whole unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::ConcurrentModification(_))
            || self.is_unique_violation()
            || self.is_transient_conflict()
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidState { .. } => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for client responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }
}

/// SQLite busy and locked result codes (primary and extended) and the
/// PostgreSQL serialization failure and deadlock SQLSTATEs.
pub(crate) fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "5" | "6" | "261" | "262" | "517" | "773" | "40001" | "40P01"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_reports_available_quantity() {
        let err = ServiceError::InsufficientStock {
            product_id: Uuid::nil(),
            warehouse_id: Uuid::nil(),
            requested: 20,
            available: 10,
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.response_message().contains("available 10"));
    }

    #[test]
    fn invalid_state_names_current_and_target() {
        let err = ServiceError::invalid_state("transfer TR-20240101-0001", "completed", "approve");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        let message = err.to_string();
        assert!(message.contains("completed"));
        assert!(message.contains("approve"));
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let err = ServiceError::InternalError("sequence table missing".into());
        assert_eq!(err.response_message(), "Internal server error");
        let db = ServiceError::db_error("connection reset");
        assert_eq!(db.response_message(), "Database error");
    }

    #[test]
    fn concurrent_modification_is_retryable() {
        assert!(ServiceError::ConcurrentModification(Uuid::nil()).is_retryable());
        assert!(!ServiceError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn lock_contention_codes_are_transient() {
        for code in ["5", "517", "6", "40001", "40P01"] {
            assert!(is_transient_code(code), "{} should be retried", code);
        }
        for code in ["19", "2067", "23505", "42P01"] {
            assert!(!is_transient_code(code), "{} should not be retried", code);
        }
        assert!(!ServiceError::db_error("connection reset").is_transient_conflict());
    }
}
