//! Warehouse and stock location reference data.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{stock_location, warehouse};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateWarehouse {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub allow_negative_stock: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateWarehouse {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub allow_negative_stock: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateLocation {
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 64))]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateLocation {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 64))]
    pub zone: Option<String>,
    pub is_active: Option<bool>,
}

/// Loads a warehouse or fails with `NotFound`.
pub(crate) async fn require_warehouse<C: ConnectionTrait>(
    conn: &C,
    warehouse_id: Uuid,
) -> Result<warehouse::Model, ServiceError> {
    warehouse::Entity::find_by_id(warehouse_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Warehouse {} not found", warehouse_id)))
}

/// Loads a location and checks it belongs to `warehouse_id`.
pub(crate) async fn require_location<C: ConnectionTrait>(
    conn: &C,
    warehouse_id: Uuid,
    location_id: Uuid,
) -> Result<stock_location::Model, ServiceError> {
    let location = stock_location::Entity::find_by_id(location_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Stock location {} not found", location_id)))?;
    if location.warehouse_id != warehouse_id {
        return Err(ServiceError::ValidationError(format!(
            "Stock location {} does not belong to warehouse {}",
            location.code, warehouse_id
        )));
    }
    Ok(location)
}

/// Rejects new commitments (reservations, transfers) against an inactive
/// warehouse. Postings stay allowed so remaining stock can be drained.
pub(crate) fn ensure_active(warehouse: &warehouse::Model, attempted: &str) -> Result<(), ServiceError> {
    if warehouse.is_active {
        Ok(())
    } else {
        Err(ServiceError::invalid_state(
            format!("warehouse {}", warehouse.code),
            "inactive",
            attempted,
        ))
    }
}

#[derive(Clone)]
pub struct WarehouseService {
    db_pool: Arc<DbPool>,
}

impl WarehouseService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn create_warehouse(
        &self,
        input: CreateWarehouse,
    ) -> Result<warehouse::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;

        let code = input.code.trim().to_uppercase();
        let existing = warehouse::Entity::find()
            .filter(warehouse::Column::Code.eq(code.as_str()))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Warehouse code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            name: Set(input.name),
            allow_negative_stock: Set(input.allow_negative_stock),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Warehouse code {} already exists", code)))?;

        info!(warehouse_id = %created.id, code = %created.code, "Created warehouse");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_warehouse(
        &self,
        warehouse_id: Uuid,
    ) -> Result<Option<warehouse::Model>, ServiceError> {
        warehouse::Entity::find_by_id(warehouse_id)
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_warehouse_by_code(
        &self,
        code: &str,
    ) -> Result<Option<warehouse::Model>, ServiceError> {
        warehouse::Entity::find()
            .filter(warehouse::Column::Code.eq(code.trim().to_uppercase()))
            .one(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_warehouses(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<warehouse::Model>, ServiceError> {
        let mut query = warehouse::Entity::find();
        if !include_inactive {
            query = query.filter(warehouse::Column::IsActive.eq(true));
        }
        query
            .order_by_asc(warehouse::Column::Code)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn update_warehouse(
        &self,
        warehouse_id: Uuid,
        input: UpdateWarehouse,
    ) -> Result<warehouse::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        let current = require_warehouse(db, warehouse_id).await?;

        let mut active: warehouse::ActiveModel = current.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(allow) = input.allow_negative_stock {
            active.allow_negative_stock = Set(allow);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)
    }

    pub async fn deactivate_warehouse(
        &self,
        warehouse_id: Uuid,
    ) -> Result<warehouse::Model, ServiceError> {
        self.update_warehouse(
            warehouse_id,
            UpdateWarehouse {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn create_location(
        &self,
        input: CreateLocation,
    ) -> Result<stock_location::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        require_warehouse(db, input.warehouse_id).await?;

        let code = input.code.trim().to_uppercase();
        let existing = stock_location::Entity::find()
            .filter(stock_location::Column::WarehouseId.eq(input.warehouse_id))
            .filter(stock_location::Column::Code.eq(code.as_str()))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Location code {} already exists in warehouse {}",
                code, input.warehouse_id
            )));
        }

        let now = Utc::now();
        let warehouse_id = input.warehouse_id;
        stock_location::ActiveModel {
            id: Set(Uuid::new_v4()),
            warehouse_id: Set(warehouse_id),
            code: Set(code.clone()),
            name: Set(input.name),
            zone: Set(input.zone),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!(
                    "Location code {} already exists in warehouse {}",
                    code, warehouse_id
                )
            })
        })
    }

    #[instrument(skip(self))]
    pub async fn list_locations(
        &self,
        warehouse_id: Uuid,
        include_inactive: bool,
    ) -> Result<Vec<stock_location::Model>, ServiceError> {
        let mut query = stock_location::Entity::find()
            .filter(stock_location::Column::WarehouseId.eq(warehouse_id));
        if !include_inactive {
            query = query.filter(stock_location::Column::IsActive.eq(true));
        }
        query
            .order_by_asc(stock_location::Column::Code)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn update_location(
        &self,
        location_id: Uuid,
        input: UpdateLocation,
    ) -> Result<stock_location::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db_pool;
        let current = stock_location::Entity::find_by_id(location_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Stock location {} not found", location_id))
            })?;

        let mut active: stock_location::ActiveModel = current.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(zone) = input.zone {
            active.zone = Set(Some(zone));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)
    }

    pub async fn deactivate_location(
        &self,
        location_id: Uuid,
    ) -> Result<stock_location::Model, ServiceError> {
        self.update_location(
            location_id,
            UpdateLocation {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }
}

/// Maps a unique-index rejection of a caller-supplied key to `Conflict`.
fn conflict_on_unique(err: sea_orm::DbErr, message: impl FnOnce() -> String) -> ServiceError {
    let err = ServiceError::db_error(err);
    if err.is_unique_violation() {
        ServiceError::Conflict(message())
    } else {
        err
    }
}
