mod common;

use assert_matches::assert_matches;
use common::TestEngine;
use stock_ledger::{
    entities::{
        low_stock_alert::{AlertLevel, AlertStatus},
        movement_entry::MovementType,
    },
    errors::ServiceError,
    services::stock_ledger::PostMovement,
};
use uuid::Uuid;

async fn sell(t: &TestEngine, product: Uuid, warehouse: Uuid, quantity: i32) {
    t.engine
        .ledger
        .post_movement(PostMovement::new(product, warehouse, quantity, MovementType::SaleOut))
        .await
        .expect("sale posts");
}

#[tokio::test]
async fn sale_into_critical_band_raises_critical_alert() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.engine
        .ledger
        .set_thresholds(product, wh.id, 5, 2, None)
        .await
        .unwrap();
    t.receive(product, wh.id, 3).await;

    let pending = t.engine.alerts().get_low_stock_alerts(Some(AlertStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].alert_level, AlertLevel::Low);

    sell(&t, product, wh.id, 2).await;

    let pending = t.engine.alerts().get_low_stock_alerts(Some(AlertStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1, "one pending alert per pair");
    let alert = &pending[0];
    assert_eq!(alert.alert_level, AlertLevel::Critical);
    assert_eq!(alert.current_quantity, 1);
    assert_eq!(alert.threshold, 2);
}

#[tokio::test]
async fn recovery_resolves_the_pending_alert() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.engine
        .ledger
        .set_thresholds(product, wh.id, 5, 2, None)
        .await
        .unwrap();
    t.receive(product, wh.id, 4).await;
    sell(&t, product, wh.id, 4).await;

    let pending = t.engine.alerts().get_low_stock_alerts(Some(AlertStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].alert_level, AlertLevel::OutOfStock);
    let alert_id = pending[0].id;

    t.receive(product, wh.id, 50).await;

    assert!(t
        .engine
        .alerts()
        .get_low_stock_alerts(Some(AlertStatus::Pending))
        .await
        .unwrap()
        .is_empty());
    let resolved = t.engine.alerts().get_alert(alert_id).await.unwrap().unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert!(resolved.resolved_at.is_some());
}

#[tokio::test]
async fn acknowledge_and_dismiss_require_a_pending_alert() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    let operator = Uuid::new_v4();
    t.receive(product, wh.id, 2).await;

    let alert = t
        .engine
        .alerts()
        .get_low_stock_alerts(Some(AlertStatus::Pending))
        .await
        .unwrap()
        .remove(0);
    let acknowledged = t
        .engine
        .alerts()
        .acknowledge_alert(alert.id, operator)
        .await
        .unwrap();
    assert_eq!(acknowledged.status, AlertStatus::Acknowledged);
    assert_eq!(acknowledged.acknowledged_by, Some(operator));

    let err = t
        .engine
        .alerts()
        .dismiss_alert(alert.id, operator)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });

    // An acknowledged alert is still the open alert and follows the stock.
    sell(&t, product, wh.id, 2).await;
    let open = t.engine.alerts().get_alert(alert.id).await.unwrap().unwrap();
    assert_eq!(open.alert_level, AlertLevel::OutOfStock);
    assert_eq!(open.status, AlertStatus::Acknowledged);
}

#[tokio::test]
async fn dismissed_alert_is_replaced_by_a_fresh_one() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 5).await;

    let first = t
        .engine
        .alerts()
        .get_low_stock_alerts(Some(AlertStatus::Pending))
        .await
        .unwrap()
        .remove(0);
    t.engine
        .alerts()
        .dismiss_alert(first.id, Uuid::new_v4())
        .await
        .unwrap();

    sell(&t, product, wh.id, 1).await;

    let pending = t.engine.alerts().get_low_stock_alerts(Some(AlertStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, first.id);
    assert_eq!(pending[0].current_quantity, 4);
}
