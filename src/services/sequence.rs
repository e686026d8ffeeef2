//! Date-scoped document numbers backed by an atomic counter row per scope.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ConnectionTrait, EntityTrait, Set};

use crate::entities::sequence_counter;
use crate::errors::ServiceError;

/// Kinds of documents that carry a generated number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSequence {
    Movement,
    Transfer,
    InventoryCount,
}

impl DocumentSequence {
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentSequence::Movement => "MV",
            DocumentSequence::Transfer => "TR",
            DocumentSequence::InventoryCount => "IC",
        }
    }

    fn width(self) -> usize {
        match self {
            DocumentSequence::Movement => 6,
            DocumentSequence::Transfer | DocumentSequence::InventoryCount => 4,
        }
    }

    /// Counter key, e.g. `MV-20240315`.
    pub fn scope(self, date: NaiveDate) -> String {
        format!("{}-{}", self.prefix(), date.format("%Y%m%d"))
    }

    pub fn format(self, date: NaiveDate, value: i64) -> String {
        format!("{}-{:0width$}", self.scope(date), value, width = self.width())
    }
}

/// Atomically increments the counter for `scope` and returns the new value.
///
/// The increment is a single `INSERT .. ON CONFLICT DO UPDATE`, so two
/// transactions can never observe the same value. Must run inside the
/// caller's transaction so the number is released on rollback.
pub async fn next_value<C: ConnectionTrait>(conn: &C, scope: &str) -> Result<i64, ServiceError> {
    let seed = sequence_counter::ActiveModel {
        scope: Set(scope.to_string()),
        value: Set(1),
    };

    sequence_counter::Entity::insert(seed)
        .on_conflict(
            OnConflict::column(sequence_counter::Column::Scope)
                .value(
                    sequence_counter::Column::Value,
                    Expr::col((sequence_counter::Entity, sequence_counter::Column::Value)).add(1),
                )
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let counter = sequence_counter::Entity::find_by_id(scope.to_string())
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::InternalError(format!("Sequence counter {} vanished after upsert", scope))
        })?;

    Ok(counter.value)
}

/// Issues the next document number of `kind` for the day of `at`.
pub async fn next_document_number<C: ConnectionTrait>(
    conn: &C,
    kind: DocumentSequence,
    at: DateTime<Utc>,
) -> Result<String, ServiceError> {
    let date = at.date_naive();
    let value = next_value(conn, &kind.scope(date)).await?;
    Ok(kind.format(date, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_zero_padded_per_kind() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            DocumentSequence::Movement.format(date, 7),
            "MV-20240315-000007"
        );
        assert_eq!(
            DocumentSequence::Transfer.format(date, 12),
            "TR-20240315-0012"
        );
        assert_eq!(
            DocumentSequence::InventoryCount.format(date, 1),
            "IC-20240315-0001"
        );
    }

    #[test]
    fn overflowing_the_width_still_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            DocumentSequence::Transfer.format(date, 12345),
            "TR-20240315-12345"
        );
    }
}
