//! Audit trail for actor-attributed mutations.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::audit_log;
use crate::errors::ServiceError;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub details: Option<JsonValue>,
}

/// Writes an audit row inside a savepoint of `txn`.
///
/// A failure is logged and rolled back to the savepoint; the enclosing
/// stock mutation still commits.
pub async fn record_best_effort(txn: &DatabaseTransaction, entry: AuditEntry) {
    if let Err(e) = record_in_savepoint(txn, &entry).await {
        warn!(
            action = entry.action,
            entity_type = entry.entity_type,
            entity_id = %entry.entity_id,
            error = %e,
            "Failed to write audit log entry"
        );
    }
}

async fn record_in_savepoint(
    txn: &DatabaseTransaction,
    entry: &AuditEntry,
) -> Result<(), ServiceError> {
    let savepoint = txn.begin().await.map_err(ServiceError::db_error)?;

    audit_log::ActiveModel {
        id: Set(Uuid::new_v4()),
        actor_id: Set(entry.actor_id),
        action: Set(entry.action.to_string()),
        entity_type: Set(entry.entity_type.to_string()),
        entity_id: Set(entry.entity_id),
        details: Set(entry.details.clone()),
        created_at: Set(Utc::now()),
    }
    .insert(&savepoint)
    .await
    .map_err(ServiceError::db_error)?;

    savepoint.commit().await.map_err(ServiceError::db_error)
}

/// Read access to the audit trail.
#[derive(Clone)]
pub struct AuditLogService {
    db_pool: Arc<DbPool>,
}

impl AuditLogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn list_for_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Result<Vec<audit_log::Model>, ServiceError> {
        audit_log::Entity::find()
            .filter(audit_log::Column::EntityType.eq(entity_type))
            .filter(audit_log::Column::EntityId.eq(entity_id))
            .order_by_asc(audit_log::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_by_actor(&self, actor_id: Uuid) -> Result<Vec<audit_log::Model>, ServiceError> {
        audit_log::Entity::find()
            .filter(audit_log::Column::ActorId.eq(actor_id))
            .order_by_desc(audit_log::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(ServiceError::db_error)
    }
}
