//! Stock Ledger Library
//!
//! Multi-warehouse stock ledger: an append-only movement history, per
//! warehouse stock records, reservations, low-stock alerts, transfers and
//! inventory counts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod retry;
pub mod services;

use std::sync::Arc;

use crate::config::StockConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::alerts::AlertService;
use crate::services::audit::AuditLogService;
use crate::services::inventory_counts::{InventoryCountService, ProductCatalog};
use crate::services::reservations::ReservationService;
use crate::services::stock_ledger::StockLedgerService;
use crate::services::transfers::TransferService;
use crate::services::warehouses::WarehouseService;

/// Every engine service wired to one pool and one event channel.
#[derive(Clone)]
pub struct StockEngine {
    pub db: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    pub ledger: StockLedgerService,
    pub reservations: Arc<ReservationService>,
    pub transfers: TransferService,
    pub counts: InventoryCountService,
    pub warehouses: WarehouseService,
    pub audit: AuditLogService,
}

impl StockEngine {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: StockConfig,
        catalog: Arc<dyn ProductCatalog>,
    ) -> Self {
        let ledger = StockLedgerService::new(db.clone(), event_sender.clone(), config);
        Self {
            reservations: Arc::new(ReservationService::new(ledger.clone())),
            transfers: TransferService::new(ledger.clone()),
            counts: InventoryCountService::new(ledger.clone(), catalog),
            warehouses: WarehouseService::new(db.clone()),
            audit: AuditLogService::new(db.clone()),
            ledger,
            db,
            event_sender,
        }
    }

    pub fn alerts(&self) -> &AlertService {
        self.ledger.alerts()
    }
}
