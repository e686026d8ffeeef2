pub mod audit_log;
pub mod inventory_count;
pub mod inventory_count_item;
pub mod low_stock_alert;
pub mod movement_entry;
pub mod reservation;
pub mod sequence_counter;
pub mod stock_location;
pub mod stock_record;
pub mod transfer;
pub mod transfer_item;
pub mod warehouse;
