use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Warehouses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Warehouses::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Warehouses::Code).string_len(64).not_null())
                    .col(ColumnDef::new(Warehouses::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Warehouses::AllowNegativeStock)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Warehouses::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Warehouses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Warehouses::UpdatedAt)
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
                    .name("idx_warehouses_code")
                    .table(Warehouses::Table)
                    .col(Warehouses::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StockLocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockLocations::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockLocations::WarehouseId).uuid().not_null())
                    .col(ColumnDef::new(StockLocations::Code).string_len(64).not_null())
                    .col(ColumnDef::new(StockLocations::Name).string_len(255).not_null())
                    .col(ColumnDef::new(StockLocations::Zone).string_len(64).null())
                    .col(
                        ColumnDef::new(StockLocations::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(StockLocations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockLocations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_locations_warehouse_id")
                            .from(StockLocations::Table, StockLocations::WarehouseId)
                            .to(Warehouses::Table, Warehouses::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Location codes are unique within their warehouse
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stock_locations_warehouse_code")
                    .table(StockLocations::Table)
                    .col(StockLocations::WarehouseId)
                    .col(StockLocations::Code)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockLocations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Warehouses::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Warehouses {
    Table,
    Id,
    Code,
    Name,
    AllowNegativeStock,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum StockLocations {
    Table,
    Id,
    WarehouseId,
    Code,
    Name,
    Zone,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
