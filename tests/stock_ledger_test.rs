mod common;

use assert_matches::assert_matches;
use common::TestEngine;
use rust_decimal_macros::dec;
use stock_ledger::{
    entities::movement_entry::{MovementReference, MovementType, ReferenceKind},
    errors::ServiceError,
    services::stock_ledger::{MovementFilter, MovementMetadata, PostMovement, StockFilter},
};
use uuid::Uuid;

#[tokio::test]
async fn postings_chain_quantity_before_and_after() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();

    let first = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 10, MovementType::PurchaseIn))
        .await
        .unwrap();
    assert_eq!((first.quantity_before, first.quantity_after), (0, 10));

    let second = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 4, MovementType::SaleOut))
        .await
        .unwrap();
    assert_eq!((second.quantity_before, second.quantity_after), (10, 6));
    assert_ne!(first.movement_number, second.movement_number);
    assert!(second.movement_number.starts_with("MV-"));
    assert_eq!(second.movement_number.len(), "MV-20240101-000001".len());

    let record = t.engine.ledger.get_stock_record(product, wh.id).await.unwrap().unwrap();
    assert_eq!(record.quantity, 6);
    assert!(record.last_received_at.is_some());
    assert!(record.last_sold_at.is_some());
    t.assert_consistent(product, wh.id).await;
}

#[tokio::test]
async fn outbound_beyond_stock_fails_and_writes_nothing() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 5).await;

    let err = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 6, MovementType::Damage))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            requested: 6,
            available: 5,
            ..
        }
    );

    assert_eq!(t.quantity(product, wh.id).await, (5, 0));
    let (entries, total) = t
        .engine
        .ledger
        .list_movements(
            MovementFilter {
                product_id: Some(product),
                ..Default::default()
            },
            1,
            50,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(entries[0].movement_type, MovementType::PurchaseIn);
}

#[tokio::test]
async fn warehouses_that_allow_negative_stock_accept_overdraw() {
    let t = TestEngine::new().await;
    let wh = t.create_warehouse("OVERDRAW", true).await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 2).await;

    let entry = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 5, MovementType::SaleOut))
        .await
        .unwrap();
    assert_eq!(entry.quantity_after, -3);
    t.assert_consistent(product, wh.id).await;
}

#[tokio::test]
async fn zero_quantity_and_unknown_warehouse_are_rejected() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();

    let err = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 0, MovementType::PurchaseIn))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = t
        .engine
        .ledger
        .post_movement(PostMovement::new(product, Uuid::new_v4(), 1, MovementType::PurchaseIn))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    assert!(!t.engine.ledger.has_stock_records(product).await.unwrap());
}

#[tokio::test]
async fn idempotency_key_replay_returns_original_entry() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    let order = Uuid::new_v4();

    let request = PostMovement::new(product, wh.id, 3, MovementType::SaleReturn)
        .with_reference(MovementReference::new(ReferenceKind::Return, order))
        .with_idempotency_key("webhook-delivery-42");

    let first = t.engine.ledger.post_movement(request.clone()).await.unwrap();
    let replay = t.engine.ledger.post_movement(request).await.unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(t.quantity(product, wh.id).await, (3, 0));

    let err = t
        .engine
        .ledger
        .post_movement(
            PostMovement::new(product, wh.id, 4, MovementType::SaleReturn)
                .with_idempotency_key("webhook-delivery-42"),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn metadata_and_reference_are_stored_on_the_entry() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    let po = Uuid::new_v4();

    let entry = t
        .engine
        .ledger
        .post_movement(
            PostMovement::new(product, wh.id, 4, MovementType::PurchaseIn)
                .with_reference(MovementReference::new(ReferenceKind::PurchaseOrder, po).with_number("PO-1001"))
                .with_metadata(MovementMetadata {
                    unit_cost: Some(dec!(2.50)),
                    batch_number: Some("B-7".into()),
                    ..Default::default()
                }),
        )
        .await
        .unwrap();

    assert_eq!(entry.total_cost, Some(dec!(10.00)));
    let reference = entry.reference().unwrap();
    assert_eq!(reference.kind, ReferenceKind::PurchaseOrder);
    assert_eq!(reference.id, po);
    assert_eq!(reference.number.as_deref(), Some("PO-1001"));

    let by_number = t
        .engine
        .ledger
        .get_movement_by_number(&entry.movement_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_number.id, entry.id);
}

#[tokio::test]
async fn available_quantity_per_warehouse_and_in_total() {
    let t = TestEngine::new().await;
    let east = t.warehouse("EAST").await;
    let west = t.warehouse("WEST").await;
    let product = Uuid::new_v4();
    t.receive(product, east.id, 7).await;
    t.receive(product, west.id, 5).await;

    let ledger = &t.engine.ledger;
    assert_eq!(ledger.get_available_quantity(product, Some(east.id)).await.unwrap(), 7);
    assert_eq!(ledger.get_available_quantity(product, None).await.unwrap(), 12);
    assert_eq!(
        ledger.get_available_quantity(Uuid::new_v4(), None).await.unwrap(),
        0
    );
    assert!(ledger.has_stock_records(product).await.unwrap());

    let (records, total) = ledger
        .list_stock(
            StockFilter {
                warehouse_id: Some(west.id),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(records[0].quantity, 5);
}

#[tokio::test]
async fn opening_balance_is_replay_safe_and_refuses_existing_history() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    let import = Uuid::new_v4();
    let ledger = &t.engine.ledger;

    let entry = ledger
        .import_opening_balance(import, product, wh.id, 40, Some(dec!(1.25)), None)
        .await
        .unwrap();
    assert_eq!(entry.movement_type, MovementType::AdjustmentIn);
    assert_eq!(entry.reference_type, Some(ReferenceKind::Import));

    let replay = ledger
        .import_opening_balance(import, product, wh.id, 40, Some(dec!(1.25)), None)
        .await
        .unwrap();
    assert_eq!(replay.id, entry.id);
    assert_eq!(t.quantity(product, wh.id).await, (40, 0));

    let other = Uuid::new_v4();
    t.receive(other, wh.id, 1).await;
    let err = ledger
        .import_opening_balance(import, other, wh.id, 10, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn thresholds_must_be_ordered() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();

    let err = t
        .engine
        .ledger
        .set_thresholds(product, wh.id, 2, 5, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let record = t
        .engine
        .ledger
        .set_thresholds(product, wh.id, 20, 5, Some(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(
        (record.low_stock_threshold, record.critical_stock_threshold),
        (20, 5)
    );
}

#[tokio::test]
async fn movement_listing_filters_and_paginates() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    for _ in 0..5 {
        t.receive(product, wh.id, 2).await;
    }
    t.engine
        .ledger
        .post_movement(PostMovement::new(product, wh.id, 1, MovementType::Expired))
        .await
        .unwrap();

    let (page_one, total) = t
        .engine
        .ledger
        .list_movements(
            MovementFilter {
                product_id: Some(product),
                ..Default::default()
            },
            1,
            4,
        )
        .await
        .unwrap();
    assert_eq!(total, 6);
    assert_eq!(page_one.len(), 4);

    let (expired, total) = t
        .engine
        .ledger
        .list_movements(
            MovementFilter {
                movement_type: Some(MovementType::Expired),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(expired[0].quantity_after, 9);

    let err = t
        .engine
        .ledger
        .list_movements(MovementFilter::default(), 0, 10)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
