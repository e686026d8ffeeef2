use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a movement relative to the stock record it is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Kind of quantity change. Every kind is statically inbound or outbound.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "purchase_in")]
    PurchaseIn,
    #[sea_orm(string_value = "purchase_return")]
    PurchaseReturn,
    #[sea_orm(string_value = "sale_out")]
    SaleOut,
    #[sea_orm(string_value = "sale_return")]
    SaleReturn,
    #[sea_orm(string_value = "transfer_in")]
    TransferIn,
    #[sea_orm(string_value = "transfer_out")]
    TransferOut,
    #[sea_orm(string_value = "adjustment_in")]
    AdjustmentIn,
    #[sea_orm(string_value = "adjustment_out")]
    AdjustmentOut,
    #[sea_orm(string_value = "damage")]
    Damage,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "assembly_in")]
    AssemblyIn,
    #[sea_orm(string_value = "assembly_out")]
    AssemblyOut,
}

impl MovementType {
    pub fn direction(self) -> Direction {
        match self {
            MovementType::PurchaseIn
            | MovementType::SaleReturn
            | MovementType::TransferIn
            | MovementType::AdjustmentIn
            | MovementType::AssemblyIn => Direction::Inbound,
            MovementType::PurchaseReturn
            | MovementType::SaleOut
            | MovementType::TransferOut
            | MovementType::AdjustmentOut
            | MovementType::Damage
            | MovementType::Expired
            | MovementType::AssemblyOut => Direction::Outbound,
        }
    }

    pub fn is_inbound(self) -> bool {
        self.direction() == Direction::Inbound
    }

    /// Whether the movement hands stock to someone and so may only draw on the
    /// unreserved part. Write-offs record stock that is already gone and only
    /// have to keep on-hand quantity from going negative.
    pub fn draws_on_available(self) -> bool {
        matches!(
            self,
            MovementType::SaleOut
                | MovementType::TransferOut
                | MovementType::PurchaseReturn
                | MovementType::AssemblyOut
        )
    }

    /// Signed change in on-hand quantity for a movement of `quantity` units.
    pub fn signed_delta(self, quantity: i32) -> i32 {
        match self.direction() {
            Direction::Inbound => quantity,
            Direction::Outbound => -quantity,
        }
    }
}

/// Business event that caused a movement.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceKind {
    #[sea_orm(string_value = "order")]
    Order,
    #[sea_orm(string_value = "reservation")]
    Reservation,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "inventory_count")]
    InventoryCount,
    #[sea_orm(string_value = "purchase_order")]
    PurchaseOrder,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "import")]
    Import,
    #[sea_orm(string_value = "manual")]
    Manual,
}

/// Tagged link from a movement to the document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceKind,
    pub id: Uuid,
    pub number: Option<String>,
}

impl MovementReference {
    pub fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self {
            kind,
            id,
            number: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// Immutable ledger entry. Rows are inserted once and never updated.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "movement_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub movement_number: String,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub location_id: Option<Uuid>,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub quantity_before: i32,
    pub quantity_after: i32,
    pub reference_type: Option<ReferenceKind>,
    pub reference_id: Option<Uuid>,
    pub reference_number: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub unit_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub total_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    #[sea_orm(unique)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// The typed reference, when both kind and id were recorded.
    pub fn reference(&self) -> Option<MovementReference> {
        match (self.reference_type, self.reference_id) {
            (Some(kind), Some(id)) => Some(MovementReference {
                kind,
                id,
                number: self.reference_number.clone(),
            }),
            _ => None,
        }
    }

    pub fn signed_delta(&self) -> i32 {
        self.movement_type.signed_delta(self.quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn twelve_movement_types_split_into_five_inbound_and_seven_outbound() {
        let all: Vec<MovementType> = MovementType::iter().collect();
        assert_eq!(all.len(), 12);
        assert_eq!(all.iter().filter(|t| t.is_inbound()).count(), 5);
    }

    #[test]
    fn signed_delta_follows_direction() {
        assert_eq!(MovementType::PurchaseIn.signed_delta(7), 7);
        assert_eq!(MovementType::SaleOut.signed_delta(7), -7);
        assert_eq!(MovementType::Damage.signed_delta(2), -2);
        assert_eq!(MovementType::AssemblyIn.signed_delta(3), 3);
    }

    #[test]
    fn write_offs_do_not_draw_on_available_stock() {
        assert!(MovementType::SaleOut.draws_on_available());
        assert!(MovementType::TransferOut.draws_on_available());
        assert!(!MovementType::AdjustmentOut.draws_on_available());
        assert!(!MovementType::Damage.draws_on_available());
        assert!(!MovementType::Expired.draws_on_available());
        assert!(MovementType::iter()
            .filter(|t| t.is_inbound())
            .all(|t| !t.draws_on_available()));
    }

    #[test]
    fn movement_type_displays_as_stored_value() {
        assert_eq!(MovementType::AdjustmentOut.to_string(), "adjustment_out");
        assert_eq!(ReferenceKind::InventoryCount.to_string(), "inventory_count");
    }
}
