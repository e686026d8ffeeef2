//! Property-based tests for the stock ledger.
//!
//! The pure rules run many cases; the database-backed conservation property
//! runs a handful, each against a fresh in-memory engine.

mod common;

use common::TestEngine;
use proptest::prelude::*;
use stock_ledger::{
    entities::{low_stock_alert::AlertLevel, movement_entry::MovementType},
    services::alerts::derive_alert_level,
    services::inventory_counts::adjustment_for,
    services::stock_ledger::PostMovement,
};
use uuid::Uuid;

fn movement_strategy() -> impl Strategy<Value = (MovementType, i32)> {
    (
        prop_oneof![
            Just(MovementType::PurchaseIn),
            Just(MovementType::SaleOut),
            Just(MovementType::SaleReturn),
            Just(MovementType::AdjustmentOut),
        ],
        1i32..25,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn alert_level_follows_thresholds(quantity in -50i32..200, critical in 0i32..20, gap in 0i32..30) {
        let low = critical + gap;
        match derive_alert_level(quantity, low, critical) {
            None => prop_assert!(quantity > low),
            Some((AlertLevel::OutOfStock, threshold)) => {
                prop_assert!(quantity <= 0);
                prop_assert_eq!(threshold, 0);
            }
            Some((AlertLevel::Critical, threshold)) => {
                prop_assert!(quantity > 0 && quantity <= critical);
                prop_assert_eq!(threshold, critical);
            }
            Some((AlertLevel::Low, threshold)) => {
                prop_assert!(quantity > critical && quantity <= low);
                prop_assert_eq!(threshold, low);
            }
        }
    }

    #[test]
    fn adjustment_restores_expected_quantity(expected in 0i32..10_000, counted in 0i32..10_000) {
        let variance = counted - expected;
        let corrected = match adjustment_for(variance) {
            None => expected,
            Some((MovementType::AdjustmentIn, quantity)) => expected + quantity,
            Some((MovementType::AdjustmentOut, quantity)) => expected - quantity,
            Some((other, _)) => return Err(TestCaseError::fail(format!("unexpected {}", other))),
        };
        prop_assert_eq!(corrected, counted);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn ledger_conserves_quantity(movements in prop::collection::vec(movement_strategy(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let t = TestEngine::new().await;
            let wh = t.warehouse("PROP").await;
            let product = Uuid::new_v4();

            let mut expected = 0i32;
            let mut posted = 0u64;
            for (movement_type, quantity) in movements {
                let result = t
                    .engine
                    .ledger
                    .post_movement(PostMovement::new(product, wh.id, quantity, movement_type))
                    .await;
                match result {
                    Ok(entry) => {
                        expected = entry.quantity_after;
                        posted += 1;
                    }
                    Err(_) => assert!(!movement_type.is_inbound() && quantity > expected),
                }
                assert!(expected >= 0);
            }

            if posted > 0 {
                let verification = t.engine.ledger.verify_ledger(product, wh.id).await.unwrap();
                assert!(verification.is_consistent(), "{:?}", verification);
                assert_eq!(verification.entry_count, posted);
                assert_eq!(verification.recorded_quantity, expected);
            }
        });
    }
}
