use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reservations::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Reservations::Id).uuid().primary_key().not_null())
                    .col(ColumnDef::new(Reservations::ProductId).uuid().not_null())
                    .col(ColumnDef::new(Reservations::WarehouseId).uuid().not_null())
                    .col(ColumnDef::new(Reservations::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(Reservations::ReservationType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Reservations::ReferenceId).uuid().not_null())
                    .col(ColumnDef::new(Reservations::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Reservations::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Reservations::ReleaseReason).text().null())
                    .col(
                        ColumnDef::new(Reservations::ReleasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Reservations::FulfilledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Reservations::MovementId).uuid().null())
                    .col(
                        ColumnDef::new(Reservations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reservations::UpdatedAt)
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
                    .name("idx_reservations_product_warehouse_status")
                    .table(Reservations::Table)
                    .col(Reservations::ProductId)
                    .col(Reservations::WarehouseId)
                    .col(Reservations::Status)
                    .to_owned(),
            )
            .await?;

        // Sweep scans confirmed holds by expiry
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reservations_status_expires_at")
                    .table(Reservations::Table)
                    .col(Reservations::Status)
                    .col(Reservations::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_reservations_reference_id")
                    .table(Reservations::Table)
                    .col(Reservations::ReferenceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(LowStockAlerts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LowStockAlerts::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LowStockAlerts::ProductId).uuid().not_null())
                    .col(ColumnDef::new(LowStockAlerts::WarehouseId).uuid().not_null())
                    .col(
                        ColumnDef::new(LowStockAlerts::AlertLevel)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(LowStockAlerts::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(LowStockAlerts::CurrentQuantity)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LowStockAlerts::Threshold).integer().not_null())
                    .col(ColumnDef::new(LowStockAlerts::AcknowledgedBy).uuid().null())
                    .col(
                        ColumnDef::new(LowStockAlerts::AcknowledgedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LowStockAlerts::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LowStockAlerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LowStockAlerts::UpdatedAt)
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
                    .name("idx_low_stock_alerts_product_warehouse_status")
                    .table(LowStockAlerts::Table)
                    .col(LowStockAlerts::ProductId)
                    .col(LowStockAlerts::WarehouseId)
                    .col(LowStockAlerts::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LowStockAlerts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Reservations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Reservations {
    Table,
    Id,
    ProductId,
    WarehouseId,
    Quantity,
    ReservationType,
    ReferenceId,
    Status,
    ExpiresAt,
    ReleaseReason,
    ReleasedAt,
    FulfilledAt,
    MovementId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum LowStockAlerts {
    Table,
    Id,
    ProductId,
    WarehouseId,
    AlertLevel,
    Status,
    CurrentQuantity,
    Threshold,
    AcknowledgedBy,
    AcknowledgedAt,
    ResolvedAt,
    CreatedAt,
    UpdatedAt,
}
