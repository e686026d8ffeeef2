//! Stock ledger
//!
//! Every change to on-hand quantity goes through [`StockLedgerService::post_movement_in`]:
//! it appends one immutable movement entry and moves the stock record's
//! cached quantity with an optimistic check-and-set on `version`.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::StockConfig;
use crate::db::{begin_write, DbPool};
use crate::entities::movement_entry::{self, MovementReference, MovementType, ReferenceKind};
use crate::entities::reservation::{self, ReservationStatus};
use crate::entities::stock_record;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::retry::{with_retry, RetryConfig, WriteConflictPolicy};
use crate::services::alerts::AlertService;
use crate::services::audit::{self, AuditEntry};
use crate::services::sequence::{self, DocumentSequence};
use crate::services::warehouses::{require_location, require_warehouse};
use crate::services::{publish_all, validate_page};

/// Optional descriptive fields carried on a movement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementMetadata {
    pub location_id: Option<Uuid>,
    pub unit_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// Request to post one movement against a (product, warehouse) pair.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PostMovement {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(range(min = 1, message = "quantity must be greater than zero"))]
    pub quantity: i32,
    pub movement_type: MovementType,
    pub reference: Option<MovementReference>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub actor: Option<Uuid>,
    #[serde(default)]
    pub metadata: MovementMetadata,
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
}

impl PostMovement {
    pub fn new(
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        movement_type: MovementType,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            quantity,
            movement_type,
            reference: None,
            notes: None,
            actor: None,
            metadata: MovementMetadata::default(),
            idempotency_key: None,
        }
    }

    pub fn with_reference(mut self, reference: MovementReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn by(mut self, actor: Option<Uuid>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_metadata(mut self, metadata: MovementMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if let Some(cost) = self.metadata.unit_cost {
            if cost.is_sign_negative() {
                return Err(ServiceError::ValidationError(
                    "unit_cost must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether `entry` is the movement this request describes. Used to
    /// reject an idempotency key reused for a different posting.
    fn matches(&self, entry: &movement_entry::Model) -> bool {
        entry.product_id == self.product_id
            && entry.warehouse_id == self.warehouse_id
            && entry.movement_type == self.movement_type
            && entry.quantity == self.quantity
    }
}

/// Field changes applied to a stock record by [`compare_and_set`].
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordChanges {
    pub quantity: Option<i32>,
    pub reserved_quantity: Option<i32>,
    pub low_stock_threshold: Option<i32>,
    pub critical_stock_threshold: Option<i32>,
    pub location_id: Option<Uuid>,
    pub last_received_at: Option<DateTime<Utc>>,
    pub last_sold_at: Option<DateTime<Utc>>,
    pub last_counted_at: Option<DateTime<Utc>>,
}

/// Writes `changes` to `record` only if nobody else bumped its version since
/// it was read. A lost race surfaces as `ConcurrentModification`.
pub(crate) async fn compare_and_set<C: ConnectionTrait>(
    conn: &C,
    record: &stock_record::Model,
    changes: RecordChanges,
) -> Result<stock_record::Model, ServiceError> {
    let now = Utc::now();
    let mut updated = record.clone();
    updated.version = record.version + 1;
    updated.updated_at = now;

    let mut update = stock_record::Entity::update_many()
        .col_expr(stock_record::Column::Version, Expr::value(updated.version))
        .col_expr(stock_record::Column::UpdatedAt, Expr::value(now));

    if let Some(quantity) = changes.quantity {
        update = update.col_expr(stock_record::Column::Quantity, Expr::value(quantity));
        updated.quantity = quantity;
    }
    if let Some(reserved) = changes.reserved_quantity {
        update = update.col_expr(stock_record::Column::ReservedQuantity, Expr::value(reserved));
        updated.reserved_quantity = reserved;
    }
    if let Some(low) = changes.low_stock_threshold {
        update = update.col_expr(stock_record::Column::LowStockThreshold, Expr::value(low));
        updated.low_stock_threshold = low;
    }
    if let Some(critical) = changes.critical_stock_threshold {
        update = update.col_expr(
            stock_record::Column::CriticalStockThreshold,
            Expr::value(critical),
        );
        updated.critical_stock_threshold = critical;
    }
    if let Some(location_id) = changes.location_id {
        update = update.col_expr(stock_record::Column::LocationId, Expr::value(location_id));
        updated.location_id = Some(location_id);
    }
    if let Some(at) = changes.last_received_at {
        update = update.col_expr(stock_record::Column::LastReceivedAt, Expr::value(at));
        updated.last_received_at = Some(at);
    }
    if let Some(at) = changes.last_sold_at {
        update = update.col_expr(stock_record::Column::LastSoldAt, Expr::value(at));
        updated.last_sold_at = Some(at);
    }
    if let Some(at) = changes.last_counted_at {
        update = update.col_expr(stock_record::Column::LastCountedAt, Expr::value(at));
        updated.last_counted_at = Some(at);
    }

    let result = update
        .filter(stock_record::Column::Id.eq(record.id))
        .filter(stock_record::Column::Version.eq(record.version))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        debug!(record_id = %record.id, version = record.version, "Stock record check-and-set lost");
        return Err(ServiceError::ConcurrentModification(record.id));
    }

    Ok(updated)
}

/// Filters for [`StockLedgerService::list_movements`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub reference_kind: Option<ReferenceKind>,
    pub reference_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Filters for [`StockLedgerService::list_stock`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockFilter {
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
    /// Only records at or below their low-stock threshold.
    #[serde(default)]
    pub low_stock_only: bool,
}

/// Result of recomputing a stock record from its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub entry_count: u64,
    pub ledger_quantity: i64,
    pub recorded_quantity: i32,
    pub confirmed_reserved: i64,
    pub recorded_reserved: i32,
}

impl LedgerVerification {
    pub fn quantity_drift(&self) -> i64 {
        i64::from(self.recorded_quantity) - self.ledger_quantity
    }

    pub fn reserved_drift(&self) -> i64 {
        i64::from(self.recorded_reserved) - self.confirmed_reserved
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity_drift() == 0 && self.reserved_drift() == 0
    }
}

/// Owns the movement ledger and the stock record projection.
#[derive(Clone)]
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: StockConfig,
    retry: RetryConfig,
    alerts: AlertService,
}

impl StockLedgerService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: StockConfig) -> Self {
        let retry = RetryConfig::from(&config);
        let alerts = AlertService::new(db_pool.clone());
        Self {
            db_pool,
            event_sender,
            config,
            retry,
            alerts,
        }
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    pub(crate) fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub(crate) fn db(&self) -> &DbPool {
        &self.db_pool
    }

    pub(crate) fn event_sender(&self) -> &EventSender {
        &self.event_sender
    }

    /// Posts a movement in its own transaction, retrying lost races.
    #[instrument(skip(self, input), fields(product_id = %input.product_id, warehouse_id = %input.warehouse_id, movement_type = %input.movement_type, quantity = input.quantity))]
    pub async fn post_movement(
        &self,
        input: PostMovement,
    ) -> Result<movement_entry::Model, ServiceError> {
        input.validate_all()?;
        let input = &input;
        let (entry, events) = with_retry(&self.retry, "post_movement", WriteConflictPolicy, move || {
            self.try_post_movement(input)
        })
        .await?;
        publish_all(&self.event_sender, events).await;
        Ok(entry)
    }

    async fn try_post_movement(
        &self,
        input: &PostMovement,
    ) -> Result<(movement_entry::Model, Vec<Event>), ServiceError> {
        let txn = begin_write(&self.db_pool).await?;
        let mut events = Vec::new();
        let entry = self.post_movement_in(&txn, input, &mut events).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok((entry, events))
    }

    /// Posts a movement inside the caller's transaction.
    ///
    /// Events are appended to `events` and must only be published once the
    /// caller has committed.
    pub async fn post_movement_in(
        &self,
        txn: &DatabaseTransaction,
        input: &PostMovement,
        events: &mut Vec<Event>,
    ) -> Result<movement_entry::Model, ServiceError> {
        input.validate_all()?;

        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(existing) = find_by_idempotency_key(txn, key).await? {
                if !input.matches(&existing) {
                    return Err(ServiceError::Conflict(format!(
                        "Idempotency key {} was already used for movement {}",
                        key, existing.movement_number
                    )));
                }
                debug!(
                    idempotency_key = key,
                    movement_number = %existing.movement_number,
                    "Replayed movement returned without posting"
                );
                counter!("stock_ledger.movements.replayed", 1);
                return Ok(existing);
            }
        }

        let warehouse = require_warehouse(txn, input.warehouse_id).await?;
        if let Some(location_id) = input.metadata.location_id {
            require_location(txn, warehouse.id, location_id).await?;
        }

        let record = self
            .get_or_create_record_in(txn, input.product_id, input.warehouse_id)
            .await?;

        let inbound = input.movement_type.is_inbound();
        let quantity_before = record.quantity;
        let quantity_after = quantity_before
            .checked_add(input.movement_type.signed_delta(input.quantity))
            .ok_or_else(|| {
                ServiceError::ValidationError("movement would overflow stock quantity".to_string())
            })?;

        let floor = if input.movement_type.draws_on_available() {
            record.reserved_quantity
        } else {
            0
        };
        if !inbound && !warehouse.allow_negative_stock && quantity_after < floor {
            counter!("stock_ledger.movements.rejected", 1, "reason" => "insufficient_stock");
            return Err(ServiceError::InsufficientStock {
                product_id: input.product_id,
                warehouse_id: input.warehouse_id,
                requested: input.quantity,
                available: record.available_quantity(),
            });
        }

        let now = Utc::now();
        let movement_number =
            sequence::next_document_number(txn, DocumentSequence::Movement, now).await?;

        let (reference_type, reference_id, reference_number) = match &input.reference {
            Some(r) => (Some(r.kind), Some(r.id), r.number.clone()),
            None => (None, None, None),
        };
        let total_cost = input
            .metadata
            .unit_cost
            .map(|cost| cost * Decimal::from(input.quantity));

        let entry = movement_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            movement_number: Set(movement_number),
            product_id: Set(input.product_id),
            warehouse_id: Set(input.warehouse_id),
            location_id: Set(input.metadata.location_id.or(record.location_id)),
            movement_type: Set(input.movement_type),
            quantity: Set(input.quantity),
            quantity_before: Set(quantity_before),
            quantity_after: Set(quantity_after),
            reference_type: Set(reference_type),
            reference_id: Set(reference_id),
            reference_number: Set(reference_number),
            unit_cost: Set(input.metadata.unit_cost),
            total_cost: Set(total_cost),
            batch_number: Set(input.metadata.batch_number.clone()),
            serial_number: Set(input.metadata.serial_number.clone()),
            expiry_date: Set(input.metadata.expiry_date),
            notes: Set(input.notes.clone()),
            created_by: Set(input.actor),
            idempotency_key: Set(input.idempotency_key.clone()),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut changes = RecordChanges {
            quantity: Some(quantity_after),
            ..Default::default()
        };
        if inbound {
            changes.last_received_at = Some(now);
        } else {
            changes.last_sold_at = Some(now);
        }
        let updated = compare_and_set(txn, &record, changes).await?;

        self.alerts.evaluate_best_effort(txn, &updated, events).await;

        if let Some(actor_id) = input.actor {
            audit::record_best_effort(
                txn,
                AuditEntry {
                    actor_id,
                    action: "post_movement",
                    entity_type: "movement_entry",
                    entity_id: entry.id,
                    details: Some(json!({
                        "movement_number": entry.movement_number,
                        "movement_type": entry.movement_type,
                        "quantity": entry.quantity,
                        "quantity_after": entry.quantity_after,
                    })),
                },
            )
            .await;
        }

        if !inbound && updated.quantity < updated.reserved_quantity {
            warn!(
                product_id = %updated.product_id,
                warehouse_id = %updated.warehouse_id,
                quantity = updated.quantity,
                reserved_quantity = updated.reserved_quantity,
                movement_type = %entry.movement_type,
                "Stock on hand fell below reserved quantity"
            );
            counter!("stock_ledger.stock.over_reserved", 1);
            events.push(Event::StockOverReserved {
                product_id: updated.product_id,
                warehouse_id: updated.warehouse_id,
                quantity: updated.quantity,
                reserved_quantity: updated.reserved_quantity,
            });
        }

        events.push(Event::MovementPosted {
            movement_id: entry.id,
            movement_number: entry.movement_number.clone(),
            product_id: entry.product_id,
            warehouse_id: entry.warehouse_id,
            movement_type: entry.movement_type,
            quantity: entry.quantity,
            quantity_after: entry.quantity_after,
        });

        counter!("stock_ledger.movements.posted", 1, "movement_type" => entry.movement_type.to_string());
        info!(
            movement_number = %entry.movement_number,
            product_id = %entry.product_id,
            warehouse_id = %entry.warehouse_id,
            movement_type = %entry.movement_type,
            quantity = entry.quantity,
            quantity_after = entry.quantity_after,
            "Posted stock movement"
        );

        Ok(entry)
    }

    /// Returns the stock record for the pair, creating an empty one first if
    /// none exists. Concurrent creators converge on the same row.
    pub async fn get_or_create_record_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<stock_record::Model, ServiceError> {
        let now = Utc::now();
        let seed = stock_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            warehouse_id: Set(warehouse_id),
            location_id: Set(None),
            quantity: Set(0),
            reserved_quantity: Set(0),
            low_stock_threshold: Set(self.config.default_low_stock_threshold),
            critical_stock_threshold: Set(self.config.default_critical_stock_threshold),
            version: Set(1),
            last_received_at: Set(None),
            last_sold_at: Set(None),
            last_counted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        stock_record::Entity::insert(seed)
            .on_conflict(
                OnConflict::columns([
                    stock_record::Column::ProductId,
                    stock_record::Column::WarehouseId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(ServiceError::db_error)?;

        find_record(conn, product_id, warehouse_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Stock record for product {} in warehouse {} missing after upsert",
                    product_id, warehouse_id
                ))
            })
    }

    /// Available quantity (on hand minus reserved) for a product, in one
    /// warehouse or summed over all of them.
    #[instrument(skip(self))]
    pub async fn get_available_quantity(
        &self,
        product_id: Uuid,
        warehouse_id: Option<Uuid>,
    ) -> Result<i32, ServiceError> {
        let db = &*self.db_pool;
        match warehouse_id {
            Some(warehouse_id) => Ok(find_record(db, product_id, warehouse_id)
                .await?
                .map(|r| r.available_quantity())
                .unwrap_or(0)),
            None => {
                let records = stock_record::Entity::find()
                    .filter(stock_record::Column::ProductId.eq(product_id))
                    .all(db)
                    .await
                    .map_err(ServiceError::db_error)?;
                Ok(records
                    .iter()
                    .map(|r| r.available_quantity().max(0))
                    .sum())
            }
        }
    }

    /// Distinguishes "never tracked" from "tracked with zero stock".
    #[instrument(skip(self))]
    pub async fn has_stock_records(&self, product_id: Uuid) -> Result<bool, ServiceError> {
        let count = stock_record::Entity::find()
            .filter(stock_record::Column::ProductId.eq(product_id))
            .count(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(count > 0)
    }

    #[instrument(skip(self))]
    pub async fn get_stock_record(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<stock_record::Model>, ServiceError> {
        find_record(&*self.db_pool, product_id, warehouse_id).await
    }

    /// Lists stock records with pagination and optional filters.
    #[instrument(skip(self))]
    pub async fn list_stock(
        &self,
        filter: StockFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<stock_record::Model>, u64), ServiceError> {
        validate_page(page, limit)?;

        let mut query = stock_record::Entity::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(stock_record::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(stock_record::Column::WarehouseId.eq(warehouse_id));
        }
        if filter.low_stock_only {
            query = query.filter(
                Expr::col(stock_record::Column::Quantity)
                    .lte(Expr::col(stock_record::Column::LowStockThreshold)),
            );
        }

        let paginator = query
            .order_by_asc(stock_record::Column::ProductId)
            .order_by_asc(stock_record::Column::WarehouseId)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let records = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((records, total))
    }

    #[instrument(skip(self))]
    pub async fn get_movement(
        &self,
        movement_id: Uuid,
    ) -> Result<Option<movement_entry::Model>, ServiceError> {
        movement_entry::Entity::find_by_id(movement_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_movement_by_number(
        &self,
        movement_number: &str,
    ) -> Result<Option<movement_entry::Model>, ServiceError> {
        movement_entry::Entity::find()
            .filter(movement_entry::Column::MovementNumber.eq(movement_number))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Lists movement entries, newest first, with pagination and filters.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        filter: MovementFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<movement_entry::Model>, u64), ServiceError> {
        validate_page(page, limit)?;

        let mut query = movement_entry::Entity::find();
        if let Some(product_id) = filter.product_id {
            query = query.filter(movement_entry::Column::ProductId.eq(product_id));
        }
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(movement_entry::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(movement_type) = filter.movement_type {
            query = query.filter(movement_entry::Column::MovementType.eq(movement_type));
        }
        if let Some(kind) = filter.reference_kind {
            query = query.filter(movement_entry::Column::ReferenceType.eq(kind));
        }
        if let Some(reference_id) = filter.reference_id {
            query = query.filter(movement_entry::Column::ReferenceId.eq(reference_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(movement_entry::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.to {
            query = query.filter(movement_entry::Column::CreatedAt.lt(to));
        }

        let paginator = query
            .order_by_desc(movement_entry::Column::CreatedAt)
            .order_by_desc(movement_entry::Column::MovementNumber)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let entries = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((entries, total))
    }

    /// Sets the alert thresholds of a pair and re-evaluates its alert.
    #[instrument(skip(self))]
    pub async fn set_thresholds(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        low_stock_threshold: i32,
        critical_stock_threshold: i32,
        actor: Option<Uuid>,
    ) -> Result<stock_record::Model, ServiceError> {
        if critical_stock_threshold < 0 || critical_stock_threshold > low_stock_threshold {
            return Err(ServiceError::ValidationError(format!(
                "Thresholds must satisfy 0 <= critical ({}) <= low ({})",
                critical_stock_threshold, low_stock_threshold
            )));
        }

        let (record, events) =
            with_retry(&self.retry, "set_thresholds", WriteConflictPolicy, move || async move {
                let txn = begin_write(&self.db_pool).await?;
                require_warehouse(&txn, warehouse_id).await?;
                let record = self
                    .get_or_create_record_in(&txn, product_id, warehouse_id)
                    .await?;
                let updated = compare_and_set(
                    &txn,
                    &record,
                    RecordChanges {
                        low_stock_threshold: Some(low_stock_threshold),
                        critical_stock_threshold: Some(critical_stock_threshold),
                        ..Default::default()
                    },
                )
                .await?;

                let mut events = Vec::new();
                self.alerts.evaluate_best_effort(&txn, &updated, &mut events).await;
                if let Some(actor_id) = actor {
                    audit::record_best_effort(
                        &txn,
                        AuditEntry {
                            actor_id,
                            action: "set_thresholds",
                            entity_type: "stock_record",
                            entity_id: updated.id,
                            details: Some(json!({
                                "low_stock_threshold": low_stock_threshold,
                                "critical_stock_threshold": critical_stock_threshold,
                            })),
                        },
                    )
                    .await;
                }
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            })
            .await?;

        publish_all(&self.event_sender, events).await;
        Ok(record)
    }

    /// Assigns the default location of a pair.
    #[instrument(skip(self))]
    pub async fn set_default_location(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        location_id: Uuid,
    ) -> Result<stock_record::Model, ServiceError> {
        with_retry(&self.retry, "set_default_location", WriteConflictPolicy, move || async move {
            let txn = begin_write(&self.db_pool).await?;
            require_warehouse(&txn, warehouse_id).await?;
            require_location(&txn, warehouse_id, location_id).await?;
            let record = self
                .get_or_create_record_in(&txn, product_id, warehouse_id)
                .await?;
            let updated = compare_and_set(
                &txn,
                &record,
                RecordChanges {
                    location_id: Some(location_id),
                    ..Default::default()
                },
            )
            .await?;
            txn.commit().await.map_err(ServiceError::db_error)?;
            Ok(updated)
        })
        .await
    }

    /// Seeds a pair that has no ledger history with an `adjustment_in`
    /// referencing the import batch.
    ///
    /// Replaying the same import for the pair returns the original entry.
    #[instrument(skip(self))]
    pub async fn import_opening_balance(
        &self,
        import_id: Uuid,
        product_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        unit_cost: Option<Decimal>,
        actor: Option<Uuid>,
    ) -> Result<movement_entry::Model, ServiceError> {
        let input = PostMovement::new(product_id, warehouse_id, quantity, MovementType::AdjustmentIn)
            .with_reference(MovementReference::new(ReferenceKind::Import, import_id))
            .with_notes("Opening balance")
            .with_metadata(MovementMetadata {
                unit_cost,
                ..Default::default()
            })
            .with_idempotency_key(format!("opening-balance:{}:{}", product_id, warehouse_id))
            .by(actor);
        input.validate_all()?;

        let input = &input;
        let (entry, events) =
            with_retry(&self.retry, "import_opening_balance", WriteConflictPolicy, move || async move {
                let txn = begin_write(&self.db_pool).await?;
                let key = input.idempotency_key.as_deref().unwrap_or_default();
                if find_by_idempotency_key(&txn, key).await?.is_none() {
                    let history = movement_entry::Entity::find()
                        .filter(movement_entry::Column::ProductId.eq(product_id))
                        .filter(movement_entry::Column::WarehouseId.eq(warehouse_id))
                        .count(&txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    if history > 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Product {} already has {} movements in warehouse {}",
                            product_id, history, warehouse_id
                        )));
                    }
                }
                let mut events = Vec::new();
                let entry = self.post_movement_in(&txn, input, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((entry, events))
            })
            .await?;

        publish_all(&self.event_sender, events).await;
        Ok(entry)
    }

    /// Recomputes quantity from the ledger and reserved quantity from
    /// confirmed reservations, and compares both with the stock record.
    #[instrument(skip(self))]
    pub async fn verify_ledger(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<LedgerVerification, ServiceError> {
        let db = &*self.db_pool;
        let record = find_record(db, product_id, warehouse_id).await?;

        let entries = movement_entry::Entity::find()
            .filter(movement_entry::Column::ProductId.eq(product_id))
            .filter(movement_entry::Column::WarehouseId.eq(warehouse_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let ledger_quantity: i64 = entries.iter().map(|e| i64::from(e.signed_delta())).sum();

        let confirmed = reservation::Entity::find()
            .filter(reservation::Column::ProductId.eq(product_id))
            .filter(reservation::Column::WarehouseId.eq(warehouse_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::Confirmed))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let confirmed_reserved: i64 = confirmed.iter().map(|r| i64::from(r.quantity)).sum();

        let verification = LedgerVerification {
            product_id,
            warehouse_id,
            entry_count: entries.len() as u64,
            ledger_quantity,
            recorded_quantity: record.as_ref().map(|r| r.quantity).unwrap_or(0),
            confirmed_reserved,
            recorded_reserved: record.as_ref().map(|r| r.reserved_quantity).unwrap_or(0),
        };

        if !verification.is_consistent() {
            warn!(
                %product_id,
                %warehouse_id,
                quantity_drift = verification.quantity_drift(),
                reserved_drift = verification.reserved_drift(),
                "Stock record drifted from ledger"
            );
        }
        Ok(verification)
    }
}

pub(crate) async fn find_record<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Option<stock_record::Model>, ServiceError> {
    stock_record::Entity::find()
        .filter(stock_record::Column::ProductId.eq(product_id))
        .filter(stock_record::Column::WarehouseId.eq(warehouse_id))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn find_by_idempotency_key<C: ConnectionTrait>(
    conn: &C,
    key: &str,
) -> Result<Option<movement_entry::Model>, ServiceError> {
    movement_entry::Entity::find()
        .filter(movement_entry::Column::IdempotencyKey.eq(key))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_quantity_is_rejected() {
        let input = PostMovement::new(Uuid::new_v4(), Uuid::new_v4(), 0, MovementType::PurchaseIn);
        assert!(matches!(
            input.validate_all(),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn negative_unit_cost_is_rejected() {
        let input = PostMovement::new(Uuid::new_v4(), Uuid::new_v4(), 3, MovementType::PurchaseIn)
            .with_metadata(MovementMetadata {
                unit_cost: Some(Decimal::new(-150, 2)),
                ..Default::default()
            });
        assert!(input.validate_all().is_err());
    }

    #[test]
    fn replay_must_describe_the_same_movement() {
        let product_id = Uuid::new_v4();
        let warehouse_id = Uuid::new_v4();
        let input = PostMovement::new(product_id, warehouse_id, 5, MovementType::SaleOut);
        let entry = movement_entry::Model {
            id: Uuid::new_v4(),
            movement_number: "MV-20240101-000001".into(),
            product_id,
            warehouse_id,
            location_id: None,
            movement_type: MovementType::SaleOut,
            quantity: 5,
            quantity_before: 10,
            quantity_after: 5,
            reference_type: None,
            reference_id: None,
            reference_number: None,
            unit_cost: None,
            total_cost: None,
            batch_number: None,
            serial_number: None,
            expiry_date: None,
            notes: None,
            created_by: None,
            idempotency_key: Some("webhook-1".into()),
            created_at: Utc::now(),
        };
        assert!(input.matches(&entry));

        let different = PostMovement::new(product_id, warehouse_id, 6, MovementType::SaleOut);
        assert!(!different.matches(&entry));
    }

    #[test]
    fn verification_reports_drift() {
        let verification = LedgerVerification {
            product_id: Uuid::nil(),
            warehouse_id: Uuid::nil(),
            entry_count: 3,
            ledger_quantity: 10,
            recorded_quantity: 12,
            confirmed_reserved: 4,
            recorded_reserved: 4,
        };
        assert_eq!(verification.quantity_drift(), 2);
        assert_eq!(verification.reserved_drift(), 0);
        assert!(!verification.is_consistent());
    }

    #[tokio::test]
    async fn stale_version_loses_check_and_set() {
        let pool = Arc::new(crate::db::establish_connection("sqlite::memory:").await.unwrap());
        crate::db::run_migrations(&pool).await.unwrap();
        let db = pool.as_ref();

        let now = Utc::now();
        let warehouse_id = Uuid::new_v4();
        crate::entities::warehouse::ActiveModel {
            id: Set(warehouse_id),
            code: Set("WH1".into()),
            name: Set("Main".into()),
            allow_negative_stock: Set(false),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .unwrap();

        let (sender, _rx) = EventSender::channel(8);
        let ledger = StockLedgerService::new(
            pool.clone(),
            Arc::new(sender),
            StockConfig::default(),
        );
        let record = ledger
            .get_or_create_record_in(db, Uuid::new_v4(), warehouse_id)
            .await
            .unwrap();

        let first = compare_and_set(
            db,
            &record,
            RecordChanges {
                quantity: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(first.version, record.version + 1);

        let err = compare_and_set(
            db,
            &record,
            RecordChanges {
                quantity: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::ConcurrentModification(id) if id == record.id));
        assert!(err.is_retryable());

        let stored = find_record(db, record.product_id, warehouse_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((stored.quantity, stored.version), (5, first.version));
    }
}
