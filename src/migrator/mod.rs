use sea_orm_migration::prelude::*;

mod m20240601_000001_create_warehouse_tables;
mod m20240601_000002_create_stock_ledger_tables;
mod m20240601_000003_create_reservation_and_alert_tables;
mod m20240601_000004_create_transfer_tables;
mod m20240601_000005_create_inventory_count_tables;
mod m20240601_000006_create_audit_logs_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_warehouse_tables::Migration),
            Box::new(m20240601_000002_create_stock_ledger_tables::Migration),
            Box::new(m20240601_000003_create_reservation_and_alert_tables::Migration),
            Box::new(m20240601_000004_create_transfer_tables::Migration),
            Box::new(m20240601_000005_create_inventory_count_tables::Migration),
            Box::new(m20240601_000006_create_audit_logs_table::Migration),
        ]
    }
}
