use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One product line of a transfer. Sent and received quantities are recorded
/// independently and are never reconciled against each other.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transfer_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub product_id: Uuid,
    pub requested_quantity: i32,
    pub sent_quantity: Option<i32>,
    pub received_quantity: Option<i32>,
    pub outbound_movement_id: Option<Uuid>,
    pub inbound_movement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Difference between what arrived and what left. `None` until both sides
    /// are recorded.
    pub fn discrepancy(&self) -> Option<i32> {
        match (self.sent_quantity, self.received_quantity) {
            (Some(sent), Some(received)) => Some(received - sent),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::transfer::Entity",
        from = "Column::TransferId",
        to = "super::transfer::Column::Id"
    )]
    Transfer,
}

impl Related<super::transfer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transfer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
