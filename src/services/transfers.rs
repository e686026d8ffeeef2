//! Inter-warehouse transfers
//!
//! A transfer moves stock in two independent legs: `ship` posts one
//! `transfer_out` per item at the source and `receive` posts one
//! `transfer_in` per item at the destination. The legs are never reconciled
//! against each other; any difference stays on the item for audit.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::begin_write;
use crate::entities::movement_entry::{MovementReference, MovementType, ReferenceKind};
use crate::entities::transfer::{self, TransferStatus};
use crate::entities::transfer_item;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::retry::{with_retry, WriteConflictPolicy};
use crate::services::audit::{self, AuditEntry};
use crate::services::sequence::{self, DocumentSequence};
use crate::services::stock_ledger::{find_record, PostMovement, StockLedgerService};
use crate::services::warehouses::{ensure_active, require_warehouse};
use crate::services::{publish_all, validate_page};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "requested quantity must be greater than zero"))]
    pub requested_quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransfer {
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[validate(length(min = 1, message = "a transfer needs at least one item"))]
    pub items: Vec<TransferItemInput>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub requested_by: Option<Uuid>,
    /// Create directly in `pending` instead of `draft`.
    #[serde(default)]
    pub submit: bool,
}

impl CreateTransfer {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for item in &self.items {
            item.validate()?;
        }
        if self.from_warehouse_id == self.to_warehouse_id {
            return Err(ServiceError::ValidationError(
                "Source and destination warehouse must differ".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub from_warehouse_id: Option<Uuid>,
    pub to_warehouse_id: Option<Uuid>,
}

/// A transfer header together with its item lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferWithItems {
    pub transfer: transfer::Model,
    pub items: Vec<transfer_item::Model>,
}

/// Drives transfers through draft, pending, in_transit and completed.
#[derive(Clone)]
pub struct TransferService {
    ledger: StockLedgerService,
}

impl TransferService {
    pub fn new(ledger: StockLedgerService) -> Self {
        Self { ledger }
    }

    /// Creates a transfer in `draft`, or `pending` when `submit` is set.
    #[instrument(skip(self, input), fields(from = %input.from_warehouse_id, to = %input.to_warehouse_id))]
    pub async fn create_transfer(
        &self,
        input: CreateTransfer,
    ) -> Result<TransferWithItems, ServiceError> {
        input.validate_all()?;
        let input = &input;

        let created = with_retry(
            self.ledger.retry_config(),
            "create_transfer",
            WriteConflictPolicy,
            move || async move {
                let txn = begin_write(self.ledger.db()).await?;
                let created = create_in(&txn, input).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(created)
            },
        )
        .await?;

        counter!("stock_ledger.transfers.created", 1);
        info!(
            transfer_number = %created.transfer.transfer_number,
            items = created.items.len(),
            "Created transfer"
        );
        Ok(created)
    }

    /// `draft -> pending`.
    #[instrument(skip(self))]
    pub async fn submit_transfer(
        &self,
        transfer_id: Uuid,
        actor: Option<Uuid>,
    ) -> Result<transfer::Model, ServiceError> {
        let (updated, events) = with_retry(
            self.ledger.retry_config(),
            "submit_transfer",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(transfer_id).await?;
                let mut events = Vec::new();
                let updated = self.submit_in(&txn, current, actor, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(updated)
    }

    async fn submit_in(
        &self,
        txn: &DatabaseTransaction,
        current: transfer::Model,
        actor: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<transfer::Model, ServiceError> {
        if current.status != TransferStatus::Draft {
            return Err(invalid(&current, "submit"));
        }
        transition(txn, &current, TransferStatus::Pending, Vec::new(), actor, events).await
    }

    /// Approves a draft or pending transfer after checking the source can
    /// cover every product. The check reads availability only; nothing is
    /// reserved until the transfer ships.
    #[instrument(skip(self))]
    pub async fn approve_transfer(
        &self,
        transfer_id: Uuid,
        approved_by: Option<Uuid>,
    ) -> Result<transfer::Model, ServiceError> {
        let (updated, events) = with_retry(
            self.ledger.retry_config(),
            "approve_transfer",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(transfer_id).await?;
                let mut events = Vec::new();
                let updated = self.approve_in(&txn, current, approved_by, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(updated)
    }

    async fn approve_in(
        &self,
        txn: &DatabaseTransaction,
        current: transfer::Model,
        approved_by: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<transfer::Model, ServiceError> {
        if !matches!(current.status, TransferStatus::Draft | TransferStatus::Pending)
            || current.is_approved()
        {
            return Err(invalid(&current, "approve"));
        }

        let items = load_items(txn, current.id).await?;
        for (product_id, quantity) in requested_per_product(&items)? {
            let available = find_record(txn, product_id, current.from_warehouse_id)
                .await?
                .map(|r| r.available_quantity())
                .unwrap_or(0);
            if available < quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    warehouse_id: current.from_warehouse_id,
                    requested: quantity,
                    available,
                });
            }
        }

        let now = Utc::now();
        transition(
            txn,
            &current,
            TransferStatus::Pending,
            vec![
                (transfer::Column::ApprovedBy, Expr::value(approved_by)),
                (transfer::Column::ApprovedAt, Expr::value(now)),
            ],
            approved_by,
            events,
        )
        .await
    }

    /// Ships an approved transfer. `sent_overrides` maps item ids to the
    /// quantity actually sent; other items ship their requested quantity.
    #[instrument(skip(self, sent_overrides))]
    pub async fn ship_transfer(
        &self,
        transfer_id: Uuid,
        sent_overrides: HashMap<Uuid, i32>,
        shipped_by: Option<Uuid>,
    ) -> Result<transfer::Model, ServiceError> {
        let overrides = &sent_overrides;
        let (updated, events) = with_retry(
            self.ledger.retry_config(),
            "ship_transfer",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(transfer_id).await?;
                let mut events = Vec::new();
                let updated = self
                    .ship_in(&txn, current, overrides, shipped_by, &mut events)
                    .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(updated)
    }

    async fn ship_in(
        &self,
        txn: &DatabaseTransaction,
        current: transfer::Model,
        overrides: &HashMap<Uuid, i32>,
        shipped_by: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<transfer::Model, ServiceError> {
        if current.status != TransferStatus::Pending || !current.is_approved() {
            return Err(invalid(&current, "ship"));
        }

        let items = load_items(txn, current.id).await?;
        check_overrides(overrides, &items)?;

        for item in items {
            let sent = overrides
                .get(&item.id)
                .copied()
                .unwrap_or(item.requested_quantity);
            if sent <= 0 || sent > item.requested_quantity {
                return Err(ServiceError::ValidationError(format!(
                    "Sent quantity {} for item {} must be between 1 and {}",
                    sent, item.id, item.requested_quantity
                )));
            }

            let entry = self
                .ledger
                .post_movement_in(
                    txn,
                    &PostMovement::new(
                        item.product_id,
                        current.from_warehouse_id,
                        sent,
                        MovementType::TransferOut,
                    )
                    .with_reference(reference(&current))
                    .by(shipped_by),
                    events,
                )
                .await?;

            let mut line = item.into_active_model();
            line.sent_quantity = Set(Some(sent));
            line.outbound_movement_id = Set(Some(entry.id));
            line.updated_at = Set(Utc::now());
            line.update(txn).await.map_err(ServiceError::db_error)?;
        }

        let now = Utc::now();
        transition(
            txn,
            &current,
            TransferStatus::InTransit,
            vec![
                (transfer::Column::ShippedBy, Expr::value(shipped_by)),
                (transfer::Column::ShippedAt, Expr::value(now)),
            ],
            shipped_by,
            events,
        )
        .await
    }

    /// Receives an in-transit transfer. `received_overrides` maps item ids to
    /// the quantity that arrived; other items receive what was sent.
    #[instrument(skip(self, received_overrides))]
    pub async fn receive_transfer(
        &self,
        transfer_id: Uuid,
        received_overrides: HashMap<Uuid, i32>,
        received_by: Option<Uuid>,
    ) -> Result<transfer::Model, ServiceError> {
        let overrides = &received_overrides;
        let (updated, events) = with_retry(
            self.ledger.retry_config(),
            "receive_transfer",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(transfer_id).await?;
                let mut events = Vec::new();
                let updated = self
                    .receive_in(&txn, current, overrides, received_by, &mut events)
                    .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(updated)
    }

    async fn receive_in(
        &self,
        txn: &DatabaseTransaction,
        current: transfer::Model,
        overrides: &HashMap<Uuid, i32>,
        received_by: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<transfer::Model, ServiceError> {
        if current.status != TransferStatus::InTransit {
            return Err(invalid(&current, "receive"));
        }

        let items = load_items(txn, current.id).await?;
        check_overrides(overrides, &items)?;

        for item in items {
            let received = overrides
                .get(&item.id)
                .copied()
                .unwrap_or_else(|| item.sent_quantity.unwrap_or(0));
            if received < 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Received quantity for item {} must not be negative",
                    item.id
                )));
            }

            let inbound_movement_id = if received > 0 {
                let entry = self
                    .ledger
                    .post_movement_in(
                        txn,
                        &PostMovement::new(
                            item.product_id,
                            current.to_warehouse_id,
                            received,
                            MovementType::TransferIn,
                        )
                        .with_reference(reference(&current))
                        .by(received_by),
                        events,
                    )
                    .await?;
                Some(entry.id)
            } else {
                None
            };

            let mut line = item.into_active_model();
            line.received_quantity = Set(Some(received));
            line.inbound_movement_id = Set(inbound_movement_id);
            line.updated_at = Set(Utc::now());
            line.update(txn).await.map_err(ServiceError::db_error)?;
        }

        let now = Utc::now();
        transition(
            txn,
            &current,
            TransferStatus::Completed,
            vec![
                (transfer::Column::ReceivedBy, Expr::value(received_by)),
                (transfer::Column::ReceivedAt, Expr::value(now)),
            ],
            received_by,
            events,
        )
        .await
    }

    /// Cancels a transfer that has not completed. Stock already shipped is
    /// returned to the source with a compensating `transfer_in`.
    #[instrument(skip(self))]
    pub async fn cancel_transfer(
        &self,
        transfer_id: Uuid,
        reason: Option<String>,
        cancelled_by: Option<Uuid>,
    ) -> Result<transfer::Model, ServiceError> {
        let reason = reason.as_deref();
        let (updated, events) = with_retry(
            self.ledger.retry_config(),
            "cancel_transfer",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(transfer_id).await?;
                let mut events = Vec::new();
                let updated = self
                    .cancel_in(&txn, current, reason, cancelled_by, &mut events)
                    .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((updated, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(updated)
    }

    async fn cancel_in(
        &self,
        txn: &DatabaseTransaction,
        current: transfer::Model,
        reason: Option<&str>,
        cancelled_by: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<transfer::Model, ServiceError> {
        if current.status.is_terminal() {
            return Err(invalid(&current, "cancel"));
        }

        if current.status == TransferStatus::InTransit {
            for item in load_items(txn, current.id).await? {
                let sent = item.sent_quantity.unwrap_or(0);
                if sent == 0 {
                    continue;
                }
                self.ledger
                    .post_movement_in(
                        txn,
                        &PostMovement::new(
                            item.product_id,
                            current.from_warehouse_id,
                            sent,
                            MovementType::TransferIn,
                        )
                        .with_reference(reference(&current))
                        .with_notes("Returned to source on cancellation")
                        .by(cancelled_by),
                        events,
                    )
                    .await?;
            }
        }

        let now = Utc::now();
        transition(
            txn,
            &current,
            TransferStatus::Cancelled,
            vec![
                (transfer::Column::CancelledBy, Expr::value(cancelled_by)),
                (transfer::Column::CancelledAt, Expr::value(now)),
                (
                    transfer::Column::CancelReason,
                    Expr::value(reason.map(str::to_string)),
                ),
            ],
            cancelled_by,
            events,
        )
        .await
    }

    /// Gets a transfer and its items by ID.
    #[instrument(skip(self))]
    pub async fn get_transfer(
        &self,
        transfer_id: Uuid,
    ) -> Result<Option<TransferWithItems>, ServiceError> {
        let db = self.ledger.db();
        let Some(found) = transfer::Entity::find_by_id(transfer_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(None);
        };
        let items = load_items(db, found.id).await?;
        Ok(Some(TransferWithItems {
            transfer: found,
            items,
        }))
    }

    /// Lists transfers with pagination and optional filters.
    #[instrument(skip(self))]
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<transfer::Model>, u64), ServiceError> {
        validate_page(page, limit)?;

        let mut query = transfer::Entity::find();
        if let Some(status) = filter.status {
            query = query.filter(transfer::Column::Status.eq(status));
        }
        if let Some(from) = filter.from_warehouse_id {
            query = query.filter(transfer::Column::FromWarehouseId.eq(from));
        }
        if let Some(to) = filter.to_warehouse_id {
            query = query.filter(transfer::Column::ToWarehouseId.eq(to));
        }

        let paginator = query
            .order_by_desc(transfer::Column::CreatedAt)
            .paginate(self.ledger.db(), limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let transfers = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((transfers, total))
    }

    async fn begin(
        &self,
        transfer_id: Uuid,
    ) -> Result<(DatabaseTransaction, transfer::Model), ServiceError> {
        let txn = begin_write(self.ledger.db()).await?;
        let current = require_transfer(&txn, transfer_id).await?;
        Ok((txn, current))
    }
}

async fn create_in(
    txn: &DatabaseTransaction,
    input: &CreateTransfer,
) -> Result<TransferWithItems, ServiceError> {
    let source = require_warehouse(txn, input.from_warehouse_id).await?;
    ensure_active(&source, "create transfer")?;
    let destination = require_warehouse(txn, input.to_warehouse_id).await?;
    ensure_active(&destination, "create transfer")?;

    let now = Utc::now();
    let transfer_number = sequence::next_document_number(txn, DocumentSequence::Transfer, now).await?;
    let status = if input.submit {
        TransferStatus::Pending
    } else {
        TransferStatus::Draft
    };

    let header = transfer::ActiveModel {
        id: Set(Uuid::new_v4()),
        transfer_number: Set(transfer_number),
        from_warehouse_id: Set(input.from_warehouse_id),
        to_warehouse_id: Set(input.to_warehouse_id),
        status: Set(status),
        notes: Set(input.notes.clone()),
        requested_by: Set(input.requested_by),
        requested_at: Set(now),
        approved_by: Set(None),
        approved_at: Set(None),
        shipped_by: Set(None),
        shipped_at: Set(None),
        received_by: Set(None),
        received_at: Set(None),
        cancelled_by: Set(None),
        cancelled_at: Set(None),
        cancel_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let mut items = Vec::with_capacity(input.items.len());
    for (position, line) in input.items.iter().enumerate() {
        // Offsetting timestamps keeps item order stable when listing.
        let stamped = now + chrono::Duration::microseconds(position as i64);
        let item = transfer_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            transfer_id: Set(header.id),
            product_id: Set(line.product_id),
            requested_quantity: Set(line.requested_quantity),
            sent_quantity: Set(None),
            received_quantity: Set(None),
            outbound_movement_id: Set(None),
            inbound_movement_id: Set(None),
            created_at: Set(stamped),
            updated_at: Set(stamped),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
        items.push(item);
    }

    if let Some(actor_id) = input.requested_by {
        audit::record_best_effort(
            txn,
            AuditEntry {
                actor_id,
                action: "create_transfer",
                entity_type: "transfer",
                entity_id: header.id,
                details: Some(json!({
                    "transfer_number": header.transfer_number,
                    "items": items.len(),
                })),
            },
        )
        .await;
    }

    Ok(TransferWithItems {
        transfer: header,
        items,
    })
}

async fn require_transfer(
    txn: &DatabaseTransaction,
    transfer_id: Uuid,
) -> Result<transfer::Model, ServiceError> {
    transfer::Entity::find_by_id(transfer_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Transfer {} not found", transfer_id)))
}

async fn load_items<C: sea_orm::ConnectionTrait>(
    conn: &C,
    transfer_id: Uuid,
) -> Result<Vec<transfer_item::Model>, ServiceError> {
    transfer_item::Entity::find()
        .filter(transfer_item::Column::TransferId.eq(transfer_id))
        .order_by_asc(transfer_item::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

fn check_overrides(
    overrides: &HashMap<Uuid, i32>,
    items: &[transfer_item::Model],
) -> Result<(), ServiceError> {
    match overrides
        .keys()
        .find(|id| !items.iter().any(|item| item.id == **id))
    {
        Some(unknown) => Err(ServiceError::ValidationError(format!(
            "Item {} is not part of this transfer",
            unknown
        ))),
        None => Ok(()),
    }
}

/// Sums requested quantities of lines that share a product.
fn requested_per_product(
    items: &[transfer_item::Model],
) -> Result<BTreeMap<Uuid, i32>, ServiceError> {
    let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
    for item in items {
        let total = requested.entry(item.product_id).or_insert(0);
        *total = total.checked_add(item.requested_quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Requested quantity for product {} overflows",
                item.product_id
            ))
        })?;
    }
    Ok(requested)
}

fn reference(current: &transfer::Model) -> MovementReference {
    MovementReference::new(ReferenceKind::Transfer, current.id)
        .with_number(current.transfer_number.clone())
}

fn invalid(current: &transfer::Model, attempted: &str) -> ServiceError {
    let status = if current.status == TransferStatus::Pending && current.is_approved() {
        "pending (approved)".to_string()
    } else {
        current.status.to_string()
    };
    ServiceError::invalid_state(
        format!("transfer {}", current.transfer_number),
        status,
        attempted,
    )
}

/// Moves the header to `target` only if its status is still the one read at
/// the start of the unit of work.
async fn transition(
    txn: &DatabaseTransaction,
    current: &transfer::Model,
    target: TransferStatus,
    stamps: Vec<(transfer::Column, SimpleExpr)>,
    actor: Option<Uuid>,
    events: &mut Vec<Event>,
) -> Result<transfer::Model, ServiceError> {
    let now: DateTime<Utc> = Utc::now();
    let mut update = transfer::Entity::update_many()
        .col_expr(transfer::Column::Status, Expr::value(target))
        .col_expr(transfer::Column::UpdatedAt, Expr::value(now));
    for (column, value) in stamps {
        update = update.col_expr(column, value);
    }

    let mut guard = transfer::Column::ApprovedAt.is_null();
    if current.approved_at.is_some() {
        guard = transfer::Column::ApprovedAt.is_not_null();
    }
    let result = update
        .filter(transfer::Column::Id.eq(current.id))
        .filter(transfer::Column::Status.eq(current.status))
        .filter(guard)
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(current.id));
    }

    let updated = require_transfer(txn, current.id).await?;

    if let Some(actor_id) = actor {
        audit::record_best_effort(
            txn,
            AuditEntry {
                actor_id,
                action: "transfer_status_changed",
                entity_type: "transfer",
                entity_id: updated.id,
                details: Some(json!({
                    "old_status": current.status,
                    "new_status": updated.status,
                })),
            },
        )
        .await;
    }

    events.push(Event::TransferStatusChanged {
        transfer_id: updated.id,
        transfer_number: updated.transfer_number.clone(),
        old_status: current.status,
        new_status: updated.status,
    });
    counter!("stock_ledger.transfers.transitions", 1, "status" => updated.status.to_string());
    info!(
        transfer_number = %updated.transfer_number,
        old_status = %current.status,
        new_status = %updated.status,
        "Transfer status changed"
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(from: Uuid, to: Uuid, quantities: &[i32]) -> CreateTransfer {
        CreateTransfer {
            from_warehouse_id: from,
            to_warehouse_id: to,
            items: quantities
                .iter()
                .map(|q| TransferItemInput {
                    product_id: Uuid::new_v4(),
                    requested_quantity: *q,
                })
                .collect(),
            notes: None,
            requested_by: None,
            submit: false,
        }
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let warehouse = Uuid::new_v4();
        assert!(request(warehouse, warehouse, &[5]).validate_all().is_err());
    }

    #[test]
    fn empty_and_non_positive_items_are_rejected() {
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(request(from, to, &[]).validate_all().is_err());
        assert!(request(from, to, &[3, 0]).validate_all().is_err());
        assert!(request(from, to, &[3, 4]).validate_all().is_ok());
    }

    fn line(product_id: Uuid, requested_quantity: i32) -> transfer_item::Model {
        let now = Utc::now();
        transfer_item::Model {
            id: Uuid::new_v4(),
            transfer_id: Uuid::new_v4(),
            product_id,
            requested_quantity,
            sent_quantity: None,
            received_quantity: None,
            outbound_movement_id: None,
            inbound_movement_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unknown_override_item_is_rejected() {
        let item = line(Uuid::new_v4(), 5);
        let mut overrides = HashMap::new();
        overrides.insert(item.id, 4);
        assert!(check_overrides(&overrides, std::slice::from_ref(&item)).is_ok());
        overrides.insert(Uuid::new_v4(), 1);
        assert!(check_overrides(&overrides, &[item]).is_err());
    }

    #[test]
    fn lines_for_one_product_are_summed() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let totals = requested_per_product(&[line(a, 6), line(b, 2), line(a, 6)]).unwrap();
        assert_eq!(totals.get(&a), Some(&12));
        assert_eq!(totals.get(&b), Some(&2));
    }

    #[test]
    fn summed_lines_that_overflow_are_rejected() {
        let product = Uuid::new_v4();
        let half = i32::MAX / 2 + 1;
        let err = requested_per_product(&[line(product, half), line(product, half)]).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
