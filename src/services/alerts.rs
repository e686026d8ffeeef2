//! Low-stock alerting
//!
//! Alert state is derived from a stock record after every change. A pair has
//! at most one open alert (pending or acknowledged); it is upserted while the
//! condition holds and resolved when quantity recovers.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::low_stock_alert::{self, AlertLevel, AlertStatus};
use crate::entities::stock_record;
use crate::errors::ServiceError;
use crate::events::Event;

/// Alert level and the threshold that was crossed, or `None` when stock is
/// healthy.
pub fn derive_alert_level(quantity: i32, low: i32, critical: i32) -> Option<(AlertLevel, i32)> {
    if quantity <= 0 {
        Some((AlertLevel::OutOfStock, 0))
    } else if quantity <= critical {
        Some((AlertLevel::Critical, critical))
    } else if quantity <= low {
        Some((AlertLevel::Low, low))
    } else {
        None
    }
}

#[derive(Clone)]
pub struct AlertService {
    db_pool: Arc<DbPool>,
}

impl AlertService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Re-evaluates the alert for `record` inside a savepoint of `txn`.
    ///
    /// Failures are logged and never abort the caller's stock mutation.
    pub async fn evaluate_best_effort(
        &self,
        txn: &DatabaseTransaction,
        record: &stock_record::Model,
        events: &mut Vec<Event>,
    ) {
        let mut pending_events = Vec::new();
        match self.evaluate_in_savepoint(txn, record, &mut pending_events).await {
            Ok(()) => events.extend(pending_events),
            Err(e) => warn!(
                product_id = %record.product_id,
                warehouse_id = %record.warehouse_id,
                error = %e,
                "Low-stock alert evaluation failed"
            ),
        }
    }

    async fn evaluate_in_savepoint(
        &self,
        txn: &DatabaseTransaction,
        record: &stock_record::Model,
        events: &mut Vec<Event>,
    ) -> Result<(), ServiceError> {
        let savepoint = txn.begin().await.map_err(ServiceError::db_error)?;
        self.evaluate_in(&savepoint, record, events).await?;
        savepoint.commit().await.map_err(ServiceError::db_error)
    }

    /// Applies the alert derivation for `record` using `txn`.
    pub async fn evaluate_in(
        &self,
        txn: &DatabaseTransaction,
        record: &stock_record::Model,
        events: &mut Vec<Event>,
    ) -> Result<Option<low_stock_alert::Model>, ServiceError> {
        let now = Utc::now();
        let condition = derive_alert_level(
            record.quantity,
            record.low_stock_threshold,
            record.critical_stock_threshold,
        );

        let open = low_stock_alert::Entity::find()
            .filter(low_stock_alert::Column::ProductId.eq(record.product_id))
            .filter(low_stock_alert::Column::WarehouseId.eq(record.warehouse_id))
            .filter(
                low_stock_alert::Column::Status
                    .is_in([AlertStatus::Pending, AlertStatus::Acknowledged]),
            )
            .order_by_desc(low_stock_alert::Column::CreatedAt)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?;

        match (condition, open) {
            (Some((level, threshold)), Some(alert)) => {
                if alert.alert_level == level
                    && alert.current_quantity == record.quantity
                    && alert.threshold == threshold
                {
                    return Ok(Some(alert));
                }
                let level_changed = alert.alert_level != level;
                let mut active: low_stock_alert::ActiveModel = alert.into();
                active.alert_level = Set(level);
                active.current_quantity = Set(record.quantity);
                active.threshold = Set(threshold);
                active.updated_at = Set(now);
                let updated = active.update(txn).await.map_err(ServiceError::db_error)?;
                if level_changed {
                    events.push(raised_event(&updated));
                }
                Ok(Some(updated))
            }
            (Some((level, threshold)), None) => {
                let created = low_stock_alert::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(record.product_id),
                    warehouse_id: Set(record.warehouse_id),
                    alert_level: Set(level),
                    status: Set(AlertStatus::Pending),
                    current_quantity: Set(record.quantity),
                    threshold: Set(threshold),
                    acknowledged_by: Set(None),
                    acknowledged_at: Set(None),
                    resolved_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await
                .map_err(ServiceError::db_error)?;
                info!(
                    product_id = %created.product_id,
                    warehouse_id = %created.warehouse_id,
                    level = %created.alert_level,
                    quantity = created.current_quantity,
                    "Low-stock alert raised"
                );
                events.push(raised_event(&created));
                Ok(Some(created))
            }
            (None, Some(alert)) => {
                let mut active: low_stock_alert::ActiveModel = alert.into();
                active.status = Set(AlertStatus::Resolved);
                active.current_quantity = Set(record.quantity);
                active.resolved_at = Set(Some(now));
                active.updated_at = Set(now);
                let resolved = active.update(txn).await.map_err(ServiceError::db_error)?;
                events.push(Event::LowStockAlertResolved {
                    alert_id: resolved.id,
                    product_id: resolved.product_id,
                    warehouse_id: resolved.warehouse_id,
                });
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        actor: Uuid,
    ) -> Result<low_stock_alert::Model, ServiceError> {
        let alert = self.require_pending(alert_id, "acknowledge").await?;
        let now = Utc::now();
        let mut active: low_stock_alert::ActiveModel = alert.into();
        active.status = Set(AlertStatus::Acknowledged);
        active.acknowledged_by = Set(Some(actor));
        active.acknowledged_at = Set(Some(now));
        active.updated_at = Set(now);
        active
            .update(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn dismiss_alert(
        &self,
        alert_id: Uuid,
        actor: Uuid,
    ) -> Result<low_stock_alert::Model, ServiceError> {
        let alert = self.require_pending(alert_id, "dismiss").await?;
        let now = Utc::now();
        let mut active: low_stock_alert::ActiveModel = alert.into();
        active.status = Set(AlertStatus::Dismissed);
        active.acknowledged_by = Set(Some(actor));
        active.updated_at = Set(now);
        active
            .update(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn require_pending(
        &self,
        alert_id: Uuid,
        attempted: &str,
    ) -> Result<low_stock_alert::Model, ServiceError> {
        let alert = self
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Low-stock alert {} not found", alert_id)))?;
        if alert.status != AlertStatus::Pending {
            return Err(ServiceError::invalid_state(
                format!("low-stock alert {}", alert_id),
                alert.status.to_string(),
                attempted,
            ));
        }
        Ok(alert)
    }

    #[instrument(skip(self))]
    pub async fn get_alert(
        &self,
        alert_id: Uuid,
    ) -> Result<Option<low_stock_alert::Model>, ServiceError> {
        low_stock_alert::Entity::find_by_id(alert_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Lists alerts, newest first, optionally restricted to one status.
    #[instrument(skip(self))]
    pub async fn get_low_stock_alerts(
        &self,
        status: Option<AlertStatus>,
    ) -> Result<Vec<low_stock_alert::Model>, ServiceError> {
        let mut query = low_stock_alert::Entity::find();
        if let Some(status) = status {
            query = query.filter(low_stock_alert::Column::Status.eq(status));
        }
        query
            .order_by_desc(low_stock_alert::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}

fn raised_event(alert: &low_stock_alert::Model) -> Event {
    Event::LowStockAlertRaised {
        alert_id: alert.id,
        product_id: alert.product_id,
        warehouse_id: alert.warehouse_id,
        level: alert.alert_level,
        current_quantity: alert.current_quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_negative_is_out_of_stock() {
        assert_eq!(derive_alert_level(0, 5, 2), Some((AlertLevel::OutOfStock, 0)));
        assert_eq!(derive_alert_level(-3, 5, 2), Some((AlertLevel::OutOfStock, 0)));
    }

    #[test]
    fn critical_wins_over_low() {
        assert_eq!(derive_alert_level(1, 5, 2), Some((AlertLevel::Critical, 2)));
        assert_eq!(derive_alert_level(2, 5, 2), Some((AlertLevel::Critical, 2)));
    }

    #[test]
    fn low_band_and_healthy_stock() {
        assert_eq!(derive_alert_level(4, 5, 2), Some((AlertLevel::Low, 5)));
        assert_eq!(derive_alert_level(5, 5, 2), Some((AlertLevel::Low, 5)));
        assert_eq!(derive_alert_level(6, 5, 2), None);
    }

    #[test]
    fn zero_thresholds_only_flag_empty_stock() {
        assert_eq!(derive_alert_level(1, 0, 0), None);
        assert_eq!(derive_alert_level(0, 0, 0), Some((AlertLevel::OutOfStock, 0)));
    }
}
