mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestEngine;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use stock_ledger::{
    entities::{
        movement_entry::{MovementType, ReferenceKind},
        reservation::{ReservationStatus, ReservationType},
        stock_record,
    },
    errors::ServiceError,
    services::reservations::{ReservationFilter, ReserveStock},
    services::warehouses::UpdateWarehouse,
};
use uuid::Uuid;

fn order_hold(product_id: Uuid, warehouse_id: Option<Uuid>, quantity: i32) -> ReserveStock {
    ReserveStock {
        product_id,
        warehouse_id,
        quantity,
        reservation_type: ReservationType::Order,
        reference_id: Uuid::new_v4(),
        expires_at: None,
    }
}

#[tokio::test]
async fn reserve_then_fulfill_posts_sale() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;

    let held = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 4))
        .await
        .unwrap();
    assert_eq!(held.status, ReservationStatus::Confirmed);
    assert_eq!(t.quantity(product, wh.id).await, (10, 4));
    assert_eq!(
        t.engine
            .ledger
            .get_available_quantity(product, Some(wh.id))
            .await
            .unwrap(),
        6
    );

    let sale = t.engine.reservations.fulfill(held.id).await.unwrap();
    assert_eq!(sale.movement_type, MovementType::SaleOut);
    assert_eq!(sale.quantity, 4);
    assert_eq!((sale.quantity_before, sale.quantity_after), (10, 6));
    assert_eq!(sale.reference_type, Some(ReferenceKind::Reservation));
    assert_eq!(sale.reference_id, Some(held.id));
    assert_eq!(t.quantity(product, wh.id).await, (6, 0));

    let fulfilled = t
        .engine
        .reservations
        .get_reservation(held.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
    assert_eq!(fulfilled.movement_id, Some(sale.id));
    assert!(fulfilled.fulfilled_at.is_some());
    t.assert_consistent(product, wh.id).await;
}

#[tokio::test]
async fn reserving_more_than_available_changes_nothing() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;

    let err = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 20))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock {
            requested: 20,
            available: 10,
            ..
        }
    );

    assert_eq!(t.quantity(product, wh.id).await, (10, 0));
    let (held, total) = t
        .engine
        .reservations
        .list_reservations(
            ReservationFilter {
                product_id: Some(product),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 0);
    assert!(held.is_empty());
}

#[tokio::test]
async fn release_returns_hold_and_is_a_no_op_afterwards() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 8).await;

    let held = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 5))
        .await
        .unwrap();
    let released = t
        .engine
        .reservations
        .release(held.id, Some("customer cancelled".into()))
        .await
        .unwrap();
    assert_eq!(released.status, ReservationStatus::Cancelled);
    assert_eq!(released.release_reason.as_deref(), Some("customer cancelled"));
    assert_eq!(t.quantity(product, wh.id).await, (8, 0));

    let again = t.engine.reservations.release(held.id, None).await.unwrap();
    assert_eq!(again.status, ReservationStatus::Cancelled);
    assert_eq!(t.quantity(product, wh.id).await, (8, 0));

    let err = t.engine.reservations.fulfill(held.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });
    t.assert_consistent(product, wh.id).await;
}

#[tokio::test]
async fn reservations_block_outbound_postings_into_held_stock() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;
    t.engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 8))
        .await
        .unwrap();

    let err = t
        .engine
        .ledger
        .post_movement(stock_ledger::services::stock_ledger::PostMovement::new(
            product,
            wh.id,
            3,
            MovementType::SaleOut,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { available: 2, .. });
    assert_eq!(t.quantity(product, wh.id).await, (10, 8));
}

#[tokio::test]
async fn warehouse_is_chosen_by_availability_when_omitted() {
    let t = TestEngine::new().await;
    let small = t.warehouse("SMALL").await;
    let large = t.warehouse("LARGE").await;
    let product = Uuid::new_v4();
    t.receive(product, small.id, 3).await;
    t.receive(product, large.id, 9).await;

    let held = t
        .engine
        .reservations
        .reserve(order_hold(product, None, 5))
        .await
        .unwrap();
    assert_eq!(held.warehouse_id, large.id);

    let err = t
        .engine
        .reservations
        .reserve(order_hold(product, None, 6))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock { available: 4, .. });
}

#[tokio::test]
async fn inactive_warehouses_take_no_new_reservations() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 5).await;
    t.engine
        .warehouses
        .update_warehouse(
            wh.id,
            UpdateWarehouse {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });
}

#[tokio::test]
async fn cart_holds_expire_through_the_sweep() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;

    let cart = t
        .engine
        .reservations
        .reserve(ReserveStock {
            reservation_type: ReservationType::Cart,
            ..order_hold(product, Some(wh.id), 2)
        })
        .await
        .unwrap();
    let hold_minutes = t.engine.ledger.config().cart_hold_minutes;
    let expires_at = cart.expires_at.expect("cart holds get a default expiry");
    assert!(expires_at > Utc::now() + Duration::minutes(hold_minutes - 1));

    let order = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 3))
        .await
        .unwrap();
    assert!(order.expires_at.is_none());

    let early = t
        .engine
        .reservations
        .expire_stale_reservations(Utc::now())
        .await
        .unwrap();
    assert_eq!(early.expired_count, 0);

    let sweep = t
        .engine
        .reservations
        .expire_stale_reservations(expires_at + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(sweep.expired_count, 1);
    assert_eq!(sweep.failed_count, 0);

    let expired = t
        .engine
        .reservations
        .get_reservation(cart.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);
    assert_eq!(t.quantity(product, wh.id).await, (10, 3));
    t.assert_consistent(product, wh.id).await;
}

#[tokio::test]
async fn past_expiry_is_rejected() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;

    let err = t
        .engine
        .reservations
        .reserve(ReserveStock {
            expires_at: Some(Utc::now() - Duration::minutes(1)),
            ..order_hold(product, Some(wh.id), 1)
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn reference_lookup_and_stats() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 20).await;

    let order_id = Uuid::new_v4();
    for quantity in [1, 2] {
        t.engine
            .reservations
            .reserve(ReserveStock {
                reference_id: order_id,
                ..order_hold(product, Some(wh.id), quantity)
            })
            .await
            .unwrap();
    }
    let other = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 3))
        .await
        .unwrap();
    t.engine.reservations.fulfill(other.id).await.unwrap();

    let for_order = t
        .engine
        .reservations
        .list_reservations_by_reference(order_id)
        .await
        .unwrap();
    assert_eq!(for_order.len(), 2);

    let stats = t.engine.reservations.get_reservation_stats().await.unwrap();
    assert_eq!(stats.total_reservations, 3);
    assert_eq!(stats.confirmed_reservations, 2);
    assert_eq!(stats.fulfilled_reservations, 1);
    assert_eq!(t.quantity(product, wh.id).await, (17, 3));
}

#[tokio::test]
async fn release_refuses_to_hide_reserved_drift() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("MAIN").await;
    let product = Uuid::new_v4();
    t.receive(product, wh.id, 10).await;
    let held = t
        .engine
        .reservations
        .reserve(order_hold(product, Some(wh.id), 4))
        .await
        .unwrap();

    stock_record::Entity::update_many()
        .col_expr(stock_record::Column::ReservedQuantity, Expr::value(0))
        .filter(stock_record::Column::ProductId.eq(product))
        .filter(stock_record::Column::WarehouseId.eq(wh.id))
        .exec(&*t.engine.db)
        .await
        .unwrap();

    let err = t.engine.reservations.release(held.id, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InternalError(_));

    let current = t
        .engine
        .reservations
        .get_reservation(held.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status, ReservationStatus::Confirmed);
    assert_eq!(t.quantity(product, wh.id).await, (10, 0));

    let verification = t.engine.ledger.verify_ledger(product, wh.id).await.unwrap();
    assert_eq!(verification.reserved_drift(), -4);
}
