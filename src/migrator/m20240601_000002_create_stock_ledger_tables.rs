use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StockRecords::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(StockRecords::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(StockRecords::ProductId).uuid().not_null())
                    .col(ColumnDef::new(StockRecords::WarehouseId).uuid().not_null())
                    .col(ColumnDef::new(StockRecords::LocationId).uuid().null())
                    .col(
                        ColumnDef::new(StockRecords::Quantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockRecords::ReservedQuantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockRecords::LowStockThreshold)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockRecords::CriticalStockThreshold)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StockRecords::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(StockRecords::LastReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockRecords::LastSoldAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockRecords::LastCountedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockRecords::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Target of the get-or-create upsert
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_records_product_warehouse")
                    .table(StockRecords::Table)
                    .col(StockRecords::ProductId)
                    .col(StockRecords::WarehouseId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MovementEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MovementEntries::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::MovementNumber)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MovementEntries::ProductId).uuid().not_null())
                    .col(ColumnDef::new(MovementEntries::WarehouseId).uuid().not_null())
                    .col(ColumnDef::new(MovementEntries::LocationId).uuid().null())
                    .col(
                        ColumnDef::new(MovementEntries::MovementType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(MovementEntries::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(MovementEntries::QuantityBefore)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::QuantityAfter)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::ReferenceType)
                            .string_len(32)
                            .null(),
                    )
                    .col(ColumnDef::new(MovementEntries::ReferenceId).uuid().null())
                    .col(
                        ColumnDef::new(MovementEntries::ReferenceNumber)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::UnitCost)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::TotalCost)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::BatchNumber)
                            .string_len(100)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::SerialNumber)
                            .string_len(100)
                            .null(),
                    )
                    .col(ColumnDef::new(MovementEntries::ExpiryDate).date().null())
                    .col(ColumnDef::new(MovementEntries::Notes).text().null())
                    .col(ColumnDef::new(MovementEntries::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(MovementEntries::IdempotencyKey)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(MovementEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_movement_entries_movement_number")
                    .table(MovementEntries::Table)
                    .col(MovementEntries::MovementNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // NULL keys never collide, so only keyed postings are deduplicated
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_movement_entries_idempotency_key")
                    .table(MovementEntries::Table)
                    .col(MovementEntries::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_movement_entries_product_warehouse_created")
                    .table(MovementEntries::Table)
                    .col(MovementEntries::ProductId)
                    .col(MovementEntries::WarehouseId)
                    .col(MovementEntries::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_movement_entries_reference")
                    .table(MovementEntries::Table)
                    .col(MovementEntries::ReferenceType)
                    .col(MovementEntries::ReferenceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SequenceCounters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SequenceCounters::Scope)
                            .string_len(32)
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SequenceCounters::Value)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SequenceCounters::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MovementEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StockRecords::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockRecords {
    Table,
    Id,
    ProductId,
    WarehouseId,
    LocationId,
    Quantity,
    ReservedQuantity,
    LowStockThreshold,
    CriticalStockThreshold,
    Version,
    LastReceivedAt,
    LastSoldAt,
    LastCountedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum MovementEntries {
    Table,
    Id,
    MovementNumber,
    ProductId,
    WarehouseId,
    LocationId,
    MovementType,
    Quantity,
    QuantityBefore,
    QuantityAfter,
    ReferenceType,
    ReferenceId,
    ReferenceNumber,
    UnitCost,
    TotalCost,
    BatchNumber,
    SerialNumber,
    ExpiryDate,
    Notes,
    CreatedBy,
    IdempotencyKey,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SequenceCounters {
    Table,
    Scope,
    Value,
}
