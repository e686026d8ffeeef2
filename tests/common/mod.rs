#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stock_ledger::{
    config::{AppConfig, StockConfig},
    db,
    entities::{movement_entry::MovementType, warehouse},
    errors::ServiceError,
    events::{self, EventSender},
    services::{
        inventory_counts::{EmptyCatalog, ProductCatalog},
        stock_ledger::PostMovement,
        warehouses::CreateWarehouse,
    },
    StockEngine,
};
use tempfile::TempDir;
use uuid::Uuid;

/// Engine backed by a fresh SQLite database, in memory unless built with
/// [`TestEngine::file_backed`].
pub struct TestEngine {
    pub engine: StockEngine,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_catalog(StockConfig::default(), Arc::new(EmptyCatalog)).await
    }

    pub async fn with_config(stock: StockConfig) -> Self {
        Self::with_catalog(stock, Arc::new(EmptyCatalog)).await
    }

    pub async fn with_catalog(stock: StockConfig, catalog: Arc<dyn ProductCatalog>) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.stock = stock;
        Self::build(cfg, catalog, None).await
    }

    /// Engine on a SQLite file with a multi-connection pool, so concurrent
    /// writers contend on real database locks.
    pub async fn file_backed() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
        let mut cfg = AppConfig::new(url, "test".to_string());
        cfg.db_max_connections = 8;
        Self::build(cfg, Arc::new(EmptyCatalog), Some(dir)).await
    }

    async fn build(cfg: AppConfig, catalog: Arc<dyn ProductCatalog>, dir: Option<TempDir>) -> Self {

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let engine = StockEngine::new(
            Arc::new(pool),
            Arc::new(event_sender),
            cfg.stock.clone(),
            catalog,
        );

        Self {
            engine,
            _event_task: event_task,
            _dir: dir,
        }
    }

    pub async fn warehouse(&self, code: &str) -> warehouse::Model {
        self.create_warehouse(code, false).await
    }

    pub async fn create_warehouse(&self, code: &str, allow_negative_stock: bool) -> warehouse::Model {
        self.engine
            .warehouses
            .create_warehouse(CreateWarehouse {
                code: code.to_string(),
                name: format!("Warehouse {}", code),
                allow_negative_stock,
            })
            .await
            .expect("create warehouse")
    }

    /// Receives `quantity` units with a purchase_in movement.
    pub async fn receive(&self, product_id: Uuid, warehouse_id: Uuid, quantity: i32) {
        self.engine
            .ledger
            .post_movement(PostMovement::new(
                product_id,
                warehouse_id,
                quantity,
                MovementType::PurchaseIn,
            ))
            .await
            .expect("seed stock");
    }

    pub async fn quantity(&self, product_id: Uuid, warehouse_id: Uuid) -> (i32, i32) {
        let record = self
            .engine
            .ledger
            .get_stock_record(product_id, warehouse_id)
            .await
            .expect("read stock record")
            .expect("stock record exists");
        (record.quantity, record.reserved_quantity)
    }

    pub async fn assert_consistent(&self, product_id: Uuid, warehouse_id: Uuid) {
        let verification = self
            .engine
            .ledger
            .verify_ledger(product_id, warehouse_id)
            .await
            .expect("verify ledger");
        assert!(
            verification.is_consistent(),
            "ledger drift: {:?}",
            verification
        );
    }
}

/// Catalog backed by fixed category and brand maps.
#[derive(Default)]
pub struct FixedCatalog {
    pub categories: HashMap<String, Vec<Uuid>>,
    pub brands: HashMap<String, Vec<Uuid>>,
}

#[async_trait]
impl ProductCatalog for FixedCatalog {
    async fn products_in_category(&self, category: &str) -> Result<Vec<Uuid>, ServiceError> {
        Ok(self.categories.get(category).cloned().unwrap_or_default())
    }

    async fn products_of_brand(&self, brand: &str) -> Result<Vec<Uuid>, ServiceError> {
        Ok(self.brands.get(brand).cloned().unwrap_or_default())
    }
}
