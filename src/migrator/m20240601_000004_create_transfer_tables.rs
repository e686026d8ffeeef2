use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transfers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Transfers::Id).uuid().primary_key().not_null())
                    .col(
                        ColumnDef::new(Transfers::TransferNumber)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::FromWarehouseId).uuid().not_null())
                    .col(ColumnDef::new(Transfers::ToWarehouseId).uuid().not_null())
                    .col(ColumnDef::new(Transfers::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Transfers::Notes).text().null())
                    .col(ColumnDef::new(Transfers::RequestedBy).uuid().null())
                    .col(
                        ColumnDef::new(Transfers::RequestedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::ApprovedBy).uuid().null())
                    .col(
                        ColumnDef::new(Transfers::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Transfers::ShippedBy).uuid().null())
                    .col(
                        ColumnDef::new(Transfers::ShippedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Transfers::ReceivedBy).uuid().null())
                    .col(
                        ColumnDef::new(Transfers::ReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Transfers::CancelledBy).uuid().null())
                    .col(
                        ColumnDef::new(Transfers::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Transfers::CancelReason).text().null())
                    .col(
                        ColumnDef::new(Transfers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::UpdatedAt)
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
                    .name("idx_transfers_transfer_number")
                    .table(Transfers::Table)
                    .col(Transfers::TransferNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TransferItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TransferItems::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransferItems::TransferId).uuid().not_null())
                    .col(ColumnDef::new(TransferItems::ProductId).uuid().not_null())
                    .col(
                        ColumnDef::new(TransferItems::RequestedQuantity)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransferItems::SentQuantity).integer().null())
                    .col(
                        ColumnDef::new(TransferItems::ReceivedQuantity)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TransferItems::OutboundMovementId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TransferItems::InboundMovementId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TransferItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TransferItems::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transfer_items_transfer_id")
                            .from(TransferItems::Table, TransferItems::TransferId)
                            .to(Transfers::Table, Transfers::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_transfer_items_transfer_id")
                    .table(TransferItems::Table)
                    .col(TransferItems::TransferId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TransferItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transfers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Transfers {
    Table,
    Id,
    TransferNumber,
    FromWarehouseId,
    ToWarehouseId,
    Status,
    Notes,
    RequestedBy,
    RequestedAt,
    ApprovedBy,
    ApprovedAt,
    ShippedBy,
    ShippedAt,
    ReceivedBy,
    ReceivedAt,
    CancelledBy,
    CancelledAt,
    CancelReason,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TransferItems {
    Table,
    Id,
    TransferId,
    ProductId,
    RequestedQuantity,
    SentQuantity,
    ReceivedQuantity,
    OutboundMovementId,
    InboundMovementId,
    CreatedAt,
    UpdatedAt,
}
