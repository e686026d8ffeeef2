use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InventoryCounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventoryCounts::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::CountNumber)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryCounts::WarehouseId).uuid().not_null())
                    .col(
                        ColumnDef::new(InventoryCounts::CountType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryCounts::Status).string_len(16).not_null())
                    .col(ColumnDef::new(InventoryCounts::LocationId).uuid().null())
                    .col(ColumnDef::new(InventoryCounts::Category).string_len(100).null())
                    .col(ColumnDef::new(InventoryCounts::Brand).string_len(100).null())
                    .col(ColumnDef::new(InventoryCounts::Notes).text().null())
                    .col(
                        ColumnDef::new(InventoryCounts::TotalItems)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::ItemsCounted)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::ItemsWithVariance)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::TotalVarianceQuantity)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(InventoryCounts::CreatedBy).uuid().null())
                    .col(
                        ColumnDef::new(InventoryCounts::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(InventoryCounts::ApprovedBy).uuid().null())
                    .col(
                        ColumnDef::new(InventoryCounts::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCounts::UpdatedAt)
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
                    .name("idx_inventory_counts_count_number")
                    .table(InventoryCounts::Table)
                    .col(InventoryCounts::CountNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(InventoryCountItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventoryCountItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryCountItems::CountId).uuid().not_null())
                    .col(ColumnDef::new(InventoryCountItems::ProductId).uuid().not_null())
                    .col(ColumnDef::new(InventoryCountItems::LocationId).uuid().null())
                    .col(
                        ColumnDef::new(InventoryCountItems::ExpectedQuantity)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCountItems::CountedQuantity)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(InventoryCountItems::Variance).integer().null())
                    .col(ColumnDef::new(InventoryCountItems::CountedBy).uuid().null())
                    .col(
                        ColumnDef::new(InventoryCountItems::CountedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCountItems::AdjustmentMovementId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(InventoryCountItems::Notes).text().null())
                    .col(
                        ColumnDef::new(InventoryCountItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(InventoryCountItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_inventory_count_items_count_id")
                            .from(InventoryCountItems::Table, InventoryCountItems::CountId)
                            .to(InventoryCounts::Table, InventoryCounts::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One line per product within a count
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_inventory_count_items_count_product")
                    .table(InventoryCountItems::Table)
                    .col(InventoryCountItems::CountId)
                    .col(InventoryCountItems::ProductId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(InventoryCountItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(InventoryCounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum InventoryCounts {
    Table,
    Id,
    CountNumber,
    WarehouseId,
    CountType,
    Status,
    LocationId,
    Category,
    Brand,
    Notes,
    TotalItems,
    ItemsCounted,
    ItemsWithVariance,
    TotalVarianceQuantity,
    CreatedBy,
    StartedAt,
    CompletedAt,
    ApprovedBy,
    ApprovedAt,
    ClosedAt,
    CancelledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum InventoryCountItems {
    Table,
    Id,
    CountId,
    ProductId,
    LocationId,
    ExpectedQuantity,
    CountedQuantity,
    Variance,
    CountedBy,
    CountedAt,
    AdjustmentMovementId,
    Notes,
    CreatedAt,
    UpdatedAt,
}
