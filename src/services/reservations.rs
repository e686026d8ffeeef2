//! Reservation manager
//!
//! Holds stock against availability without touching on-hand quantity.
//! Every transition that changes `reserved_quantity` shares one transaction
//! with the reservation row, so the reserved total always equals the sum of
//! confirmed reservations for the pair.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::begin_write;
use crate::entities::movement_entry::{self, MovementReference, MovementType, ReferenceKind};
use crate::entities::reservation::{self, ReservationStatus, ReservationType};
use crate::entities::stock_record;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::retry::{with_retry, WriteConflictPolicy};
use crate::services::stock_ledger::{compare_and_set, find_record, PostMovement, RecordChanges, StockLedgerService};
use crate::services::warehouses::{ensure_active, require_warehouse};
use crate::services::{publish_all, validate_page};

/// Request to hold stock for an order, cart or transfer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReserveStock {
    pub product_id: Uuid,
    /// When omitted, the warehouse with the most available stock that can
    /// cover the whole quantity is chosen.
    pub warehouse_id: Option<Uuid>,
    #[validate(range(min = 1, message = "quantity must be greater than zero"))]
    pub quantity: i32,
    pub reservation_type: ReservationType,
    pub reference_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub reservation_type: Option<ReservationType>,
}

/// Result of one sweep over stale reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    /// Reservations moved to `expired`.
    pub expired_count: u64,
    /// Reservations that could not be expired this round.
    pub failed_count: u64,
    pub swept_at: DateTime<Utc>,
}

/// Statistics about reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationStats {
    pub total_reservations: u64,
    pub confirmed_reservations: u64,
    pub fulfilled_reservations: u64,
    pub cancelled_reservations: u64,
    pub expired_reservations: u64,
    pub expired_not_swept: u64,
    pub expiring_within_24h: u64,
    pub stats_at: DateTime<Utc>,
}

/// Service for managing stock reservations.
#[derive(Clone)]
pub struct ReservationService {
    ledger: StockLedgerService,
}

impl ReservationService {
    pub fn new(ledger: StockLedgerService) -> Self {
        Self { ledger }
    }

    /// Creates a confirmed reservation and raises `reserved_quantity`.
    ///
    /// Fails with `InsufficientStock` when availability does not cover the
    /// request; nothing is written in that case.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, quantity = input.quantity))]
    pub async fn reserve(&self, input: ReserveStock) -> Result<reservation::Model, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        if let Some(expires_at) = input.expires_at {
            if expires_at <= now {
                return Err(ServiceError::ValidationError(
                    "expires_at must be in the future".to_string(),
                ));
            }
        }

        let input = &input;
        let result = with_retry(
            self.ledger.retry_config(),
            "reserve",
            WriteConflictPolicy,
            move || async move {
                let txn = begin_write(self.ledger.db()).await?;
                let mut events = Vec::new();
                let created = self.reserve_in(&txn, input, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((created, events))
            },
        )
        .await;

        match result {
            Ok((created, events)) => {
                publish_all(self.ledger.event_sender(), events).await;
                Ok(created)
            }
            Err(e) => {
                if matches!(e, ServiceError::InsufficientStock { .. }) {
                    counter!("stock_ledger.reservations.insufficient_stock", 1);
                }
                Err(e)
            }
        }
    }

    /// Creates a reservation inside the caller's transaction.
    pub async fn reserve_in(
        &self,
        txn: &DatabaseTransaction,
        input: &ReserveStock,
        events: &mut Vec<Event>,
    ) -> Result<reservation::Model, ServiceError> {
        input.validate()?;
        let record = self.select_record(txn, input).await?;

        if record.available_quantity() < input.quantity {
            return Err(ServiceError::InsufficientStock {
                product_id: input.product_id,
                warehouse_id: record.warehouse_id,
                requested: input.quantity,
                available: record.available_quantity(),
            });
        }

        let now = Utc::now();
        let expires_at = match (input.expires_at, input.reservation_type) {
            (Some(at), _) => Some(at),
            (None, ReservationType::Cart) => {
                Some(now + Duration::minutes(self.ledger.config().cart_hold_minutes))
            }
            (None, _) => None,
        };

        let reserved_quantity = record.reserved_quantity + input.quantity;
        compare_and_set(
            txn,
            &record,
            RecordChanges {
                reserved_quantity: Some(reserved_quantity),
                ..Default::default()
            },
        )
        .await?;

        let created = reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(input.product_id),
            warehouse_id: Set(record.warehouse_id),
            quantity: Set(input.quantity),
            reservation_type: Set(input.reservation_type),
            reference_id: Set(input.reference_id),
            status: Set(ReservationStatus::Confirmed),
            expires_at: Set(expires_at),
            release_reason: Set(None),
            released_at: Set(None),
            fulfilled_at: Set(None),
            movement_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        events.push(Event::StockReserved {
            reservation_id: created.id,
            product_id: created.product_id,
            warehouse_id: created.warehouse_id,
            quantity: created.quantity,
            reservation_type: created.reservation_type,
            reference_id: created.reference_id,
        });
        counter!("stock_ledger.reservations.created", 1);
        info!(
            reservation_id = %created.id,
            warehouse_id = %created.warehouse_id,
            quantity = created.quantity,
            reserved_quantity,
            "Reserved stock"
        );

        Ok(created)
    }

    async fn select_record(
        &self,
        txn: &DatabaseTransaction,
        input: &ReserveStock,
    ) -> Result<stock_record::Model, ServiceError> {
        if let Some(warehouse_id) = input.warehouse_id {
            let warehouse = require_warehouse(txn, warehouse_id).await?;
            ensure_active(&warehouse, "reserve stock")?;
            return self
                .ledger
                .get_or_create_record_in(txn, input.product_id, warehouse_id)
                .await;
        }

        let candidates = stock_record::Entity::find()
            .filter(stock_record::Column::ProductId.eq(input.product_id))
            .order_by_asc(stock_record::Column::CreatedAt)
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut best: Option<stock_record::Model> = None;
        for record in candidates {
            let warehouse = require_warehouse(txn, record.warehouse_id).await?;
            if !warehouse.is_active {
                continue;
            }
            if best
                .as_ref()
                .map(|b| record.available_quantity() > b.available_quantity())
                .unwrap_or(true)
            {
                best = Some(record);
            }
        }

        best.ok_or(ServiceError::InsufficientStock {
            product_id: input.product_id,
            warehouse_id: Uuid::nil(),
            requested: input.quantity,
            available: 0,
        })
    }

    /// Cancels a confirmed reservation and returns the held quantity to
    /// availability. Releasing a reservation that is no longer confirmed is
    /// a no-op that returns it unchanged.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        reservation_id: Uuid,
        reason: Option<String>,
    ) -> Result<reservation::Model, ServiceError> {
        let reason = reason.as_deref();
        self.run_release(reservation_id, ReservationStatus::Cancelled, reason)
            .await
    }

    async fn run_release(
        &self,
        reservation_id: Uuid,
        terminal: ReservationStatus,
        reason: Option<&str>,
    ) -> Result<reservation::Model, ServiceError> {
        let (released, events) = with_retry(
            self.ledger.retry_config(),
            "release_reservation",
            WriteConflictPolicy,
            move || async move {
                let txn = begin_write(self.ledger.db()).await?;
                let current = require_reservation(&txn, reservation_id).await?;
                let mut events = Vec::new();
                let released = self
                    .release_in(&txn, current, terminal, reason, &mut events)
                    .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((released, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(released)
    }

    /// Shared release path for manual cancellation and expiry.
    pub async fn release_in(
        &self,
        txn: &DatabaseTransaction,
        current: reservation::Model,
        terminal: ReservationStatus,
        reason: Option<&str>,
        events: &mut Vec<Event>,
    ) -> Result<reservation::Model, ServiceError> {
        if current.status != ReservationStatus::Confirmed {
            return Ok(current);
        }

        let now = Utc::now();
        transition_from_confirmed(
            txn,
            current.id,
            terminal,
            vec![
                (reservation::Column::ReleaseReason, Expr::value(reason.map(str::to_string))),
                (reservation::Column::ReleasedAt, Expr::value(now)),
            ],
            now,
        )
        .await?;

        self.reduce_reserved(txn, &current).await?;

        let mut released = current;
        released.status = terminal;
        released.release_reason = reason.map(str::to_string);
        released.released_at = Some(now);
        released.updated_at = now;

        events.push(match terminal {
            ReservationStatus::Expired => Event::ReservationExpired {
                reservation_id: released.id,
                product_id: released.product_id,
                warehouse_id: released.warehouse_id,
                quantity: released.quantity,
            },
            _ => Event::ReservationReleased {
                reservation_id: released.id,
                product_id: released.product_id,
                warehouse_id: released.warehouse_id,
                quantity: released.quantity,
                reason: released.release_reason.clone(),
            },
        });
        info!(
            reservation_id = %released.id,
            status = %released.status,
            quantity = released.quantity,
            "Released reservation"
        );
        Ok(released)
    }

    /// Converts a confirmed reservation into a `sale_out` movement.
    #[instrument(skip(self))]
    pub async fn fulfill(
        &self,
        reservation_id: Uuid,
    ) -> Result<movement_entry::Model, ServiceError> {
        let (entry, events) = with_retry(
            self.ledger.retry_config(),
            "fulfill_reservation",
            WriteConflictPolicy,
            move || async move {
                let txn = begin_write(self.ledger.db()).await?;
                let mut events = Vec::new();
                let entry = self.fulfill_in(&txn, reservation_id, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((entry, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(entry)
    }

    pub async fn fulfill_in(
        &self,
        txn: &DatabaseTransaction,
        reservation_id: Uuid,
        events: &mut Vec<Event>,
    ) -> Result<movement_entry::Model, ServiceError> {
        let current = require_reservation(txn, reservation_id).await?;
        if current.status != ReservationStatus::Confirmed {
            return Err(ServiceError::invalid_state(
                format!("reservation {}", reservation_id),
                current.status.to_string(),
                "fulfill",
            ));
        }

        // The hold is dropped first so the sale is checked against stock
        // that is no longer reserved by this reservation.
        self.reduce_reserved(txn, &current).await?;

        let entry = self
            .ledger
            .post_movement_in(
                txn,
                &PostMovement::new(
                    current.product_id,
                    current.warehouse_id,
                    current.quantity,
                    MovementType::SaleOut,
                )
                .with_reference(MovementReference::new(ReferenceKind::Reservation, current.id)),
                events,
            )
            .await?;

        let now = Utc::now();
        transition_from_confirmed(
            txn,
            current.id,
            ReservationStatus::Fulfilled,
            vec![
                (reservation::Column::FulfilledAt, Expr::value(now)),
                (reservation::Column::MovementId, Expr::value(entry.id)),
            ],
            now,
        )
        .await?;

        events.push(Event::ReservationFulfilled {
            reservation_id: current.id,
            movement_id: entry.id,
        });
        counter!("stock_ledger.reservations.fulfilled", 1);
        Ok(entry)
    }

    async fn reduce_reserved(
        &self,
        txn: &DatabaseTransaction,
        held: &reservation::Model,
    ) -> Result<stock_record::Model, ServiceError> {
        let record = find_record(txn, held.product_id, held.warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Stock record missing for confirmed reservation {}",
                    held.id
                ))
            })?;

        let remaining = record.reserved_quantity - held.quantity;
        if remaining < 0 {
            error!(
                reservation_id = %held.id,
                reserved_quantity = record.reserved_quantity,
                quantity = held.quantity,
                "Reserved quantity would drop below zero"
            );
            counter!("stock_ledger.reservations.reserved_drift", 1);
            return Err(ServiceError::InternalError(format!(
                "Stock record reserves {} units but reservation {} holds {}",
                record.reserved_quantity, held.id, held.quantity
            )));
        }

        compare_and_set(
            txn,
            &record,
            RecordChanges {
                reserved_quantity: Some(remaining),
                ..Default::default()
            },
        )
        .await
    }

    /// Expires every confirmed reservation whose `expires_at` is at or before
    /// `now`, through the same path as a manual release.
    #[instrument(skip(self))]
    pub async fn expire_stale_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepResult, ServiceError> {
        let stale = reservation::Entity::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
            .filter(reservation::Column::ExpiresAt.lte(now))
            .order_by_asc(reservation::Column::ExpiresAt)
            .all(self.ledger.db())
            .await
            .map_err(ServiceError::db_error)?;

        let mut expired_count = 0u64;
        let mut failed_count = 0u64;

        for held in stale {
            match self
                .run_release(held.id, ReservationStatus::Expired, Some("expired"))
                .await
            {
                Ok(released) if released.status == ReservationStatus::Expired => {
                    expired_count += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    failed_count += 1;
                    warn!(
                        reservation_id = %held.id,
                        error = %e,
                        "Failed to expire reservation"
                    );
                }
            }
        }

        if expired_count > 0 || failed_count > 0 {
            info!(expired_count, failed_count, "Completed reservation sweep");
        }
        counter!("stock_ledger.reservations.expired", expired_count);

        Ok(SweepResult {
            expired_count,
            failed_count,
            swept_at: now,
        })
    }

    /// Runs [`Self::expire_stale_reservations`] on a fixed interval until the
    /// returned task is aborted.
    pub fn spawn_reservation_sweeper(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.expire_stale_reservations(Utc::now()).await {
                    error!(error = %e, "Reservation sweep failed");
                }
            }
        })
    }

    /// Gets a reservation by ID.
    #[instrument(skip(self))]
    pub async fn get_reservation(
        &self,
        reservation_id: Uuid,
    ) -> Result<Option<reservation::Model>, ServiceError> {
        reservation::Entity::find_by_id(reservation_id)
            .one(self.ledger.db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Lists reservations with pagination and optional filters.
    #[instrument(skip(self))]
    pub async fn list_reservations(
        &self,
        filter: ReservationFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<reservation::Model>, u64), ServiceError> {
        validate_page(page, limit)?;

        let mut query = reservation::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(reservation::Column::Status.eq(status));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(reservation::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(reservation::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(reservation_type) = filter.reservation_type {
            query = query.filter(reservation::Column::ReservationType.eq(reservation_type));
        }

        let paginator = query
            .order_by_desc(reservation::Column::CreatedAt)
            .paginate(self.ledger.db(), limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let models = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((models, total))
    }

    /// Lists reservations for a specific reference (e.g., order).
    #[instrument(skip(self))]
    pub async fn list_reservations_by_reference(
        &self,
        reference_id: Uuid,
    ) -> Result<Vec<reservation::Model>, ServiceError> {
        reservation::Entity::find()
            .filter(reservation::Column::ReferenceId.eq(reference_id))
            .order_by_desc(reservation::Column::CreatedAt)
            .all(self.ledger.db())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Gets statistics about reservations.
    #[instrument(skip(self))]
    pub async fn get_reservation_stats(&self) -> Result<ReservationStats, ServiceError> {
        let db = self.ledger.db();
        let now = Utc::now();

        let count_status = |status: ReservationStatus| {
            reservation::Entity::find()
                .filter(reservation::Column::Status.eq(status))
                .count(db)
        };

        let total_reservations = reservation::Entity::find()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        let confirmed_reservations = count_status(ReservationStatus::Confirmed)
            .await
            .map_err(ServiceError::db_error)?;
        let fulfilled_reservations = count_status(ReservationStatus::Fulfilled)
            .await
            .map_err(ServiceError::db_error)?;
        let cancelled_reservations = count_status(ReservationStatus::Cancelled)
            .await
            .map_err(ServiceError::db_error)?;
        let expired_reservations = count_status(ReservationStatus::Expired)
            .await
            .map_err(ServiceError::db_error)?;

        let expired_not_swept = reservation::Entity::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
            .filter(reservation::Column::ExpiresAt.lte(now))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        let expiring_within_24h = reservation::Entity::find()
            .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
            .filter(reservation::Column::ExpiresAt.gt(now))
            .filter(reservation::Column::ExpiresAt.lt(now + Duration::hours(24)))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(ReservationStats {
            total_reservations,
            confirmed_reservations,
            fulfilled_reservations,
            cancelled_reservations,
            expired_reservations,
            expired_not_swept,
            expiring_within_24h,
            stats_at: now,
        })
    }
}

async fn require_reservation(
    txn: &DatabaseTransaction,
    reservation_id: Uuid,
) -> Result<reservation::Model, ServiceError> {
    reservation::Entity::find_by_id(reservation_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Reservation {} not found", reservation_id)))
}

/// Moves a reservation out of `confirmed` only if it is still confirmed.
async fn transition_from_confirmed(
    txn: &DatabaseTransaction,
    reservation_id: Uuid,
    target: ReservationStatus,
    extra: Vec<(reservation::Column, sea_orm::sea_query::SimpleExpr)>,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let mut update = reservation::Entity::update_many()
        .col_expr(reservation::Column::Status, Expr::value(target))
        .col_expr(reservation::Column::UpdatedAt, Expr::value(now));
    for (column, value) in extra {
        update = update.col_expr(column, value);
    }

    let result = update
        .filter(reservation::Column::Id.eq(reservation_id))
        .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(reservation_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_request_requires_positive_quantity() {
        let input = ReserveStock {
            product_id: Uuid::new_v4(),
            warehouse_id: None,
            quantity: 0,
            reservation_type: ReservationType::Order,
            reference_id: Uuid::new_v4(),
            expires_at: None,
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn only_confirmed_reservations_are_open() {
        assert!(!ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }
}
