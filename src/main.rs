use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use stock_ledger::{
    config::{self, AppConfig},
    db,
    events::{self, EventSender},
    services::inventory_counts::EmptyCatalog,
    StockEngine,
};
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "stock-ledger", about = "Multi-warehouse stock ledger maintenance", version)]
struct Cli {
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Expire confirmed reservations whose hold has passed
    SweepReservations {
        #[arg(long, help = "Keep sweeping on the configured interval")]
        watch: bool,
    },
    /// Show available quantity for a product
    Available {
        product_id: Uuid,
        #[arg(long, help = "Limit to one warehouse; defaults to all warehouses")]
        warehouse: Option<Uuid>,
    },
    /// Recompute a stock record from its ledger and report drift
    Verify { product_id: Uuid, warehouse_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.engine.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::SweepReservations { watch } => {
            if watch {
                let interval =
                    Duration::from_secs(context.config.stock.reservation_sweep_interval_secs);
                info!(?interval, "Starting reservation sweeper");
                let handle = context.engine.reservations.clone().spawn_reservation_sweeper(interval);
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for shutdown signal")?;
                handle.abort();
            } else {
                let result = context
                    .engine
                    .reservations
                    .expire_stale_reservations(Utc::now())
                    .await
                    .context("reservation sweep failed")?;
                if cli.json {
                    print_json(&result)?;
                } else {
                    println!(
                        "Expired {} reservations ({} failed)",
                        result.expired_count, result.failed_count
                    );
                }
            }
        }
        Commands::Available {
            product_id,
            warehouse,
        } => {
            let available = context
                .engine
                .ledger
                .get_available_quantity(product_id, warehouse)
                .await
                .context("failed to read available quantity")?;
            if cli.json {
                print_json(&serde_json::json!({
                    "product_id": product_id,
                    "warehouse_id": warehouse,
                    "available": available,
                }))?;
            } else {
                println!("{}", available);
            }
        }
        Commands::Verify {
            product_id,
            warehouse_id,
        } => {
            let verification = context
                .engine
                .ledger
                .verify_ledger(product_id, warehouse_id)
                .await
                .context("failed to verify ledger")?;
            if cli.json {
                print_json(&verification)?;
            } else {
                println!(
                    "{} entries • ledger {} • recorded {} • reserved {} / {} • {}",
                    verification.entry_count,
                    verification.ledger_quantity,
                    verification.recorded_quantity,
                    verification.recorded_reserved,
                    verification.confirmed_reserved,
                    if verification.is_consistent() {
                        "consistent"
                    } else {
                        "DRIFT"
                    }
                );
            }
            if !verification.is_consistent() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

struct CliContext {
    config: AppConfig,
    engine: StockEngine,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let engine = StockEngine::new(
            Arc::new(db_pool),
            Arc::new(event_sender),
            config.stock.clone(),
            Arc::new(EmptyCatalog),
        );

        Ok(Self { config, engine })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
