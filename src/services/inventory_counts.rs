//! Inventory counts
//!
//! A count snapshots the expected quantity of every targeted product, collects
//! physically counted quantities, and on approval posts one adjustment per
//! non-zero variance. Approval is the only step that touches stock.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::begin_write;
use crate::entities::inventory_count::{self, CountStatus, CountType};
use crate::entities::inventory_count_item;
use crate::entities::movement_entry::{MovementReference, MovementType, ReferenceKind};
use crate::entities::stock_record;
use crate::errors::ServiceError;
use crate::events::Event;
use crate::retry::{with_retry, WriteConflictPolicy};
use crate::services::audit::{self, AuditEntry};
use crate::services::sequence::{self, DocumentSequence};
use crate::services::stock_ledger::{compare_and_set, PostMovement, RecordChanges, StockLedgerService};
use crate::services::warehouses::{require_location, require_warehouse};
use crate::services::{publish_all, validate_page};

/// Product metadata lookup used to scope counts by category or brand.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn products_in_category(&self, category: &str) -> Result<Vec<Uuid>, ServiceError>;
    async fn products_of_brand(&self, brand: &str) -> Result<Vec<Uuid>, ServiceError>;
}

/// Catalog that knows no products, so category and brand scopes match
/// nothing. Location and product-list scopes still work.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyCatalog;

#[async_trait]
impl ProductCatalog for EmptyCatalog {
    async fn products_in_category(&self, _category: &str) -> Result<Vec<Uuid>, ServiceError> {
        Ok(Vec::new())
    }

    async fn products_of_brand(&self, _brand: &str) -> Result<Vec<Uuid>, ServiceError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInventoryCount {
    pub warehouse_id: Uuid,
    pub count_type: CountType,
    pub location_id: Option<Uuid>,
    #[validate(length(min = 1, max = 128))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub brand: Option<String>,
    /// Explicit products to count. Products without a stock record are
    /// counted with an expected quantity of zero.
    pub product_ids: Option<Vec<Uuid>>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
}

impl CreateInventoryCount {
    fn has_scope(&self) -> bool {
        self.location_id.is_some()
            || self.category.is_some()
            || self.brand.is_some()
            || self.product_ids.is_some()
    }

    fn validate_scope(&self) -> Result<(), ServiceError> {
        self.validate()?;
        match (self.count_type, self.has_scope()) {
            (CountType::Full, true) => Err(ServiceError::ValidationError(
                "A full count covers the whole warehouse and takes no scope filter".to_string(),
            )),
            (CountType::Partial | CountType::Cycle, false) => Err(ServiceError::ValidationError(
                format!(
                    "A {} count needs a location, category, brand or product list",
                    self.count_type
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// A counted quantity for one product of a count.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CountEntry {
    pub product_id: Uuid,
    #[validate(range(min = 0, message = "counted quantity must not be negative"))]
    pub counted_quantity: i32,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountFilter {
    pub warehouse_id: Option<Uuid>,
    pub status: Option<CountStatus>,
    pub count_type: Option<CountType>,
}

/// A count header together with its item lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountWithItems {
    pub count: inventory_count::Model,
    pub items: Vec<inventory_count_item::Model>,
}

/// Roll-up of count items stored on the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSummary {
    pub total_items: i32,
    pub items_counted: i32,
    pub items_with_variance: i32,
    pub total_variance_quantity: i32,
}

impl CountSummary {
    pub fn from_items(items: &[inventory_count_item::Model]) -> Self {
        items.iter().fold(
            CountSummary {
                total_items: items.len() as i32,
                ..Default::default()
            },
            |mut summary, item| {
                if item.is_counted() {
                    summary.items_counted += 1;
                }
                if let Some(variance) = item.variance.filter(|v| *v != 0) {
                    summary.items_with_variance += 1;
                    summary.total_variance_quantity += variance;
                }
                summary
            },
        )
    }

    fn stamps(&self) -> Vec<(inventory_count::Column, SimpleExpr)> {
        vec![
            (inventory_count::Column::TotalItems, Expr::value(self.total_items)),
            (inventory_count::Column::ItemsCounted, Expr::value(self.items_counted)),
            (
                inventory_count::Column::ItemsWithVariance,
                Expr::value(self.items_with_variance),
            ),
            (
                inventory_count::Column::TotalVarianceQuantity,
                Expr::value(self.total_variance_quantity),
            ),
        ]
    }
}

/// Movement that corrects a variance, or `None` when the count matched.
pub fn adjustment_for(variance: i32) -> Option<(MovementType, i32)> {
    match variance {
        0 => None,
        v if v > 0 => Some((MovementType::AdjustmentIn, v)),
        v => Some((MovementType::AdjustmentOut, -v)),
    }
}

/// Runs counts from creation through approval and closing.
#[derive(Clone)]
pub struct InventoryCountService {
    ledger: StockLedgerService,
    catalog: Arc<dyn ProductCatalog>,
}

impl InventoryCountService {
    pub fn new(ledger: StockLedgerService, catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { ledger, catalog }
    }

    /// Creates a draft count with expected quantities snapshotted from the
    /// current stock records.
    #[instrument(skip(self, input), fields(warehouse_id = %input.warehouse_id, count_type = %input.count_type))]
    pub async fn create_count(
        &self,
        input: CreateInventoryCount,
    ) -> Result<CountWithItems, ServiceError> {
        input.validate_scope()?;
        let catalog_scope = self.catalog_scope(&input).await?;

        let input = &input;
        let catalog_scope = &catalog_scope;
        let created = with_retry(
            self.ledger.retry_config(),
            "create_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let txn = begin_write(self.ledger.db()).await?;
                let created = create_in(&txn, input, catalog_scope.as_ref()).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(created)
            },
        )
        .await?;

        counter!("stock_ledger.inventory_counts.created", 1);
        info!(
            count_number = %created.count.count_number,
            total_items = created.count.total_items,
            "Created inventory count"
        );
        Ok(created)
    }

    /// Products allowed by the category and brand filters, intersected.
    async fn catalog_scope(
        &self,
        input: &CreateInventoryCount,
    ) -> Result<Option<HashSet<Uuid>>, ServiceError> {
        let mut scope: Option<HashSet<Uuid>> = None;
        if let Some(category) = input.category.as_deref() {
            let products: HashSet<Uuid> = self
                .catalog
                .products_in_category(category)
                .await?
                .into_iter()
                .collect();
            scope = Some(products);
        }
        if let Some(brand) = input.brand.as_deref() {
            let products: HashSet<Uuid> = self
                .catalog
                .products_of_brand(brand)
                .await?
                .into_iter()
                .collect();
            scope = Some(match scope {
                Some(existing) => existing.intersection(&products).copied().collect(),
                None => products,
            });
        }
        Ok(scope)
    }

    /// `draft -> in_progress`.
    #[instrument(skip(self))]
    pub async fn start_count(&self, count_id: Uuid) -> Result<inventory_count::Model, ServiceError> {
        with_retry(
            self.ledger.retry_config(),
            "start_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                if current.status != CountStatus::Draft {
                    return Err(invalid(&current, "start"));
                }
                let updated = transition(
                    &txn,
                    &current,
                    CountStatus::InProgress,
                    vec![(inventory_count::Column::StartedAt, Expr::value(Utc::now()))],
                )
                .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(updated)
            },
        )
        .await
    }

    /// Records counted quantities without changing the count's status.
    #[instrument(skip(self, entries))]
    pub async fn record_counts(
        &self,
        count_id: Uuid,
        entries: Vec<CountEntry>,
        counted_by: Option<Uuid>,
    ) -> Result<CountWithItems, ServiceError> {
        validate_entries(&entries)?;
        let entries = &entries;
        with_retry(
            self.ledger.retry_config(),
            "record_counts",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                if !current.status.accepts_counts() {
                    return Err(invalid(&current, "record counts"));
                }
                let items = apply_counts(&txn, &current, entries, counted_by).await?;
                let summary = CountSummary::from_items(&items);
                let count = transition(&txn, &current, current.status, summary.stamps()).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(CountWithItems { count, items })
            },
        )
        .await
    }

    /// Applies the final counted quantities and moves the count to
    /// `pending_review`. Every item must be counted by then.
    #[instrument(skip(self, entries))]
    pub async fn complete_count(
        &self,
        count_id: Uuid,
        entries: Vec<CountEntry>,
        counted_by: Option<Uuid>,
    ) -> Result<CountWithItems, ServiceError> {
        validate_entries(&entries)?;
        let entries = &entries;
        with_retry(
            self.ledger.retry_config(),
            "complete_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                if !current.status.accepts_counts() {
                    return Err(invalid(&current, "complete"));
                }
                let items = apply_counts(&txn, &current, entries, counted_by).await?;
                let uncounted = items.iter().filter(|i| !i.is_counted()).count();
                if uncounted > 0 {
                    return Err(ServiceError::ValidationError(format!(
                        "{} items of count {} have not been counted",
                        uncounted, current.count_number
                    )));
                }

                let summary = CountSummary::from_items(&items);
                let mut stamps = summary.stamps();
                stamps.push((inventory_count::Column::CompletedAt, Expr::value(Utc::now())));
                let count = transition(&txn, &current, CountStatus::PendingReview, stamps).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(CountWithItems { count, items })
            },
        )
        .await
    }

    /// Approves a count under review and posts its adjustments.
    ///
    /// The status moves first, guarded on `pending_review`, so a second
    /// approval fails with `InvalidState` and never posts again.
    #[instrument(skip(self))]
    pub async fn approve_count(
        &self,
        count_id: Uuid,
        approved_by: Option<Uuid>,
    ) -> Result<inventory_count::Model, ServiceError> {
        let (approved, events) = with_retry(
            self.ledger.retry_config(),
            "approve_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                let mut events = Vec::new();
                let approved = self.approve_in(&txn, current, approved_by, &mut events).await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok((approved, events))
            },
        )
        .await?;
        publish_all(self.ledger.event_sender(), events).await;
        Ok(approved)
    }

    async fn approve_in(
        &self,
        txn: &DatabaseTransaction,
        current: inventory_count::Model,
        approved_by: Option<Uuid>,
        events: &mut Vec<Event>,
    ) -> Result<inventory_count::Model, ServiceError> {
        if current.status != CountStatus::PendingReview {
            return Err(invalid(&current, "approve"));
        }

        let now = Utc::now();
        let approved = transition(
            txn,
            &current,
            CountStatus::Approved,
            vec![
                (inventory_count::Column::ApprovedBy, Expr::value(approved_by)),
                (inventory_count::Column::ApprovedAt, Expr::value(now)),
            ],
        )
        .await?;

        let reference = MovementReference::new(ReferenceKind::InventoryCount, current.id)
            .with_number(current.count_number.clone());
        let mut adjustments_posted = 0usize;

        for item in load_items(txn, current.id).await? {
            let variance = item.variance.unwrap_or(0);
            let product_id = item.product_id;

            if let Some((movement_type, quantity)) = adjustment_for(variance) {
                let entry = self
                    .ledger
                    .post_movement_in(
                        txn,
                        &PostMovement::new(product_id, current.warehouse_id, quantity, movement_type)
                            .with_reference(reference.clone())
                            .with_notes(format!("Count variance {}", variance))
                            .by(approved_by),
                        events,
                    )
                    .await?;
                adjustments_posted += 1;

                let mut line = item.into_active_model();
                line.adjustment_movement_id = Set(Some(entry.id));
                line.updated_at = Set(now);
                line.update(txn).await.map_err(ServiceError::db_error)?;
            }

            let record = self
                .ledger
                .get_or_create_record_in(txn, product_id, current.warehouse_id)
                .await?;
            compare_and_set(
                txn,
                &record,
                RecordChanges {
                    last_counted_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        }

        if let Some(actor_id) = approved_by {
            audit::record_best_effort(
                txn,
                AuditEntry {
                    actor_id,
                    action: "approve_inventory_count",
                    entity_type: "inventory_count",
                    entity_id: approved.id,
                    details: Some(json!({
                        "count_number": approved.count_number,
                        "adjustments_posted": adjustments_posted,
                        "total_variance_quantity": approved.total_variance_quantity,
                    })),
                },
            )
            .await;
        }

        events.push(Event::InventoryCountApproved {
            count_id: approved.id,
            count_number: approved.count_number.clone(),
            adjustments_posted,
        });
        counter!("stock_ledger.inventory_counts.approved", 1);
        info!(
            count_number = %approved.count_number,
            adjustments_posted,
            "Approved inventory count"
        );
        Ok(approved)
    }

    /// `approved -> completed`.
    #[instrument(skip(self))]
    pub async fn close_count(&self, count_id: Uuid) -> Result<inventory_count::Model, ServiceError> {
        with_retry(
            self.ledger.retry_config(),
            "close_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                if current.status != CountStatus::Approved {
                    return Err(invalid(&current, "close"));
                }
                let updated = transition(
                    &txn,
                    &current,
                    CountStatus::Completed,
                    vec![(inventory_count::Column::ClosedAt, Expr::value(Utc::now()))],
                )
                .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(updated)
            },
        )
        .await
    }

    /// Cancels a count that has not been approved.
    #[instrument(skip(self))]
    pub async fn cancel_count(&self, count_id: Uuid) -> Result<inventory_count::Model, ServiceError> {
        with_retry(
            self.ledger.retry_config(),
            "cancel_inventory_count",
            WriteConflictPolicy,
            move || async move {
                let (txn, current) = self.begin(count_id).await?;
                if !current.status.is_cancellable() {
                    return Err(invalid(&current, "cancel"));
                }
                let updated = transition(
                    &txn,
                    &current,
                    CountStatus::Cancelled,
                    vec![(inventory_count::Column::CancelledAt, Expr::value(Utc::now()))],
                )
                .await?;
                txn.commit().await.map_err(ServiceError::db_error)?;
                Ok(updated)
            },
        )
        .await
    }

    /// Gets a count and its items by ID.
    #[instrument(skip(self))]
    pub async fn get_count(&self, count_id: Uuid) -> Result<Option<CountWithItems>, ServiceError> {
        let db = self.ledger.db();
        let Some(count) = inventory_count::Entity::find_by_id(count_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            return Ok(None);
        };
        let items = load_items(db, count.id).await?;
        Ok(Some(CountWithItems { count, items }))
    }

    /// Lists counts with pagination and optional filters.
    #[instrument(skip(self))]
    pub async fn list_counts(
        &self,
        filter: CountFilter,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<inventory_count::Model>, u64), ServiceError> {
        validate_page(page, limit)?;

        let mut query = inventory_count::Entity::find();
        if let Some(warehouse_id) = filter.warehouse_id {
            query = query.filter(inventory_count::Column::WarehouseId.eq(warehouse_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(inventory_count::Column::Status.eq(status));
        }
        if let Some(count_type) = filter.count_type {
            query = query.filter(inventory_count::Column::CountType.eq(count_type));
        }

        let paginator = query
            .order_by_desc(inventory_count::Column::CreatedAt)
            .paginate(self.ledger.db(), limit);
        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let counts = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((counts, total))
    }

    async fn begin(
        &self,
        count_id: Uuid,
    ) -> Result<(DatabaseTransaction, inventory_count::Model), ServiceError> {
        let txn = begin_write(self.ledger.db()).await?;
        let current = inventory_count::Entity::find_by_id(count_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory count {} not found", count_id))
            })?;
        Ok((txn, current))
    }
}

async fn create_in(
    txn: &DatabaseTransaction,
    input: &CreateInventoryCount,
    catalog_scope: Option<&HashSet<Uuid>>,
) -> Result<CountWithItems, ServiceError> {
    require_warehouse(txn, input.warehouse_id).await?;
    if let Some(location_id) = input.location_id {
        require_location(txn, input.warehouse_id, location_id).await?;
    }

    let records: BTreeMap<Uuid, stock_record::Model> = stock_record::Entity::find()
        .filter(stock_record::Column::WarehouseId.eq(input.warehouse_id))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|r| (r.product_id, r))
        .collect();

    let candidates: BTreeSet<Uuid> = match &input.product_ids {
        Some(ids) => ids.iter().copied().collect(),
        None => records.keys().copied().collect(),
    };

    let targets: Vec<(Uuid, Option<&stock_record::Model>)> = candidates
        .into_iter()
        .map(|product_id| (product_id, records.get(&product_id)))
        .filter(|(product_id, _)| catalog_scope.map_or(true, |scope| scope.contains(product_id)))
        .filter(|(_, record)| match input.location_id {
            Some(location_id) => record.and_then(|r| r.location_id) == Some(location_id),
            None => true,
        })
        .collect();

    if targets.is_empty() {
        return Err(ServiceError::ValidationError(
            "No products match the count scope".to_string(),
        ));
    }

    let now = Utc::now();
    let count_number =
        sequence::next_document_number(txn, DocumentSequence::InventoryCount, now).await?;

    let header = inventory_count::ActiveModel {
        id: Set(Uuid::new_v4()),
        count_number: Set(count_number),
        warehouse_id: Set(input.warehouse_id),
        count_type: Set(input.count_type),
        status: Set(CountStatus::Draft),
        location_id: Set(input.location_id),
        category: Set(input.category.clone()),
        brand: Set(input.brand.clone()),
        notes: Set(input.notes.clone()),
        total_items: Set(targets.len() as i32),
        items_counted: Set(0),
        items_with_variance: Set(0),
        total_variance_quantity: Set(0),
        created_by: Set(input.created_by),
        started_at: Set(None),
        completed_at: Set(None),
        approved_by: Set(None),
        approved_at: Set(None),
        closed_at: Set(None),
        cancelled_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let mut items = Vec::with_capacity(targets.len());
    for (product_id, record) in targets {
        let item = inventory_count_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            count_id: Set(header.id),
            product_id: Set(product_id),
            location_id: Set(record.and_then(|r| r.location_id)),
            expected_quantity: Set(record.map(|r| r.quantity).unwrap_or(0)),
            counted_quantity: Set(None),
            variance: Set(None),
            counted_by: Set(None),
            counted_at: Set(None),
            adjustment_movement_id: Set(None),
            notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
        items.push(item);
    }

    if let Some(actor_id) = input.created_by {
        audit::record_best_effort(
            txn,
            AuditEntry {
                actor_id,
                action: "create_inventory_count",
                entity_type: "inventory_count",
                entity_id: header.id,
                details: Some(json!({
                    "count_number": header.count_number,
                    "count_type": header.count_type,
                    "total_items": header.total_items,
                })),
            },
        )
        .await;
    }

    Ok(CountWithItems {
        count: header,
        items,
    })
}

fn validate_entries(entries: &[CountEntry]) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for entry in entries {
        entry.validate()?;
        if !seen.insert(entry.product_id) {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is counted twice in one submission",
                entry.product_id
            )));
        }
    }
    Ok(())
}

/// Writes counted quantities and variances; returns every item of the count.
async fn apply_counts(
    txn: &DatabaseTransaction,
    count: &inventory_count::Model,
    entries: &[CountEntry],
    counted_by: Option<Uuid>,
) -> Result<Vec<inventory_count_item::Model>, ServiceError> {
    let mut items = load_items(txn, count.id).await?;
    let now = Utc::now();

    for entry in entries {
        let Some(slot) = items.iter_mut().find(|i| i.product_id == entry.product_id) else {
            return Err(ServiceError::ValidationError(format!(
                "Product {} is not part of count {}",
                entry.product_id, count.count_number
            )));
        };

        let mut line = slot.clone().into_active_model();
        line.counted_quantity = Set(Some(entry.counted_quantity));
        line.variance = Set(Some(entry.counted_quantity - slot.expected_quantity));
        line.counted_by = Set(counted_by);
        line.counted_at = Set(Some(now));
        if entry.notes.is_some() {
            line.notes = Set(entry.notes.clone());
        }
        line.updated_at = Set(now);
        *slot = line.update(txn).await.map_err(ServiceError::db_error)?;
    }

    Ok(items)
}

async fn load_items<C: ConnectionTrait>(
    conn: &C,
    count_id: Uuid,
) -> Result<Vec<inventory_count_item::Model>, ServiceError> {
    inventory_count_item::Entity::find()
        .filter(inventory_count_item::Column::CountId.eq(count_id))
        .order_by_asc(inventory_count_item::Column::ProductId)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

fn invalid(current: &inventory_count::Model, attempted: &str) -> ServiceError {
    ServiceError::invalid_state(
        format!("inventory count {}", current.count_number),
        current.status.to_string(),
        attempted,
    )
}

/// Writes `target` and `stamps` only if the status read at the start of the
/// unit of work is still current.
async fn transition(
    txn: &DatabaseTransaction,
    current: &inventory_count::Model,
    target: CountStatus,
    stamps: Vec<(inventory_count::Column, SimpleExpr)>,
) -> Result<inventory_count::Model, ServiceError> {
    let mut update = inventory_count::Entity::update_many()
        .col_expr(inventory_count::Column::Status, Expr::value(target))
        .col_expr(inventory_count::Column::UpdatedAt, Expr::value(Utc::now()));
    for (column, value) in stamps {
        update = update.col_expr(column, value);
    }

    let result = update
        .filter(inventory_count::Column::Id.eq(current.id))
        .filter(inventory_count::Column::Status.eq(current.status))
        .exec(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(current.id));
    }

    let updated = inventory_count::Entity::find_by_id(current.id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Inventory count {} not found", current.id))
        })?;

    if updated.status != current.status {
        info!(
            count_number = %updated.count_number,
            old_status = %current.status,
            new_status = %updated.status,
            "Inventory count status changed"
        );
    }
    Ok(updated)
}
