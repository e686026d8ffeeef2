mod common;

use assert_matches::assert_matches;
use common::TestEngine;
use stock_ledger::{
    entities::inventory_count::CountType,
    errors::ServiceError,
    services::inventory_counts::CreateInventoryCount,
    services::warehouses::{CreateLocation, CreateWarehouse, UpdateWarehouse},
};
use uuid::Uuid;

#[tokio::test]
async fn warehouse_codes_are_unique_and_normalised() {
    let t = TestEngine::new().await;
    let created = t.warehouse("east-1").await;
    assert_eq!(created.code, "EAST-1");
    assert!(created.is_active);

    let err = t
        .engine
        .warehouses
        .create_warehouse(CreateWarehouse {
            code: " East-1 ".into(),
            name: "Duplicate".into(),
            allow_negative_stock: false,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let found = t
        .engine
        .warehouses
        .get_warehouse_by_code("east-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);
}

#[tokio::test]
async fn deactivated_warehouses_drop_out_of_listings() {
    let t = TestEngine::new().await;
    let keep = t.warehouse("KEEP").await;
    let retire = t.warehouse("RETIRE").await;
    let warehouses = &t.engine.warehouses;

    let renamed = warehouses
        .update_warehouse(
            keep.id,
            UpdateWarehouse {
                name: Some("Main".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "Main");

    warehouses.deactivate_warehouse(retire.id).await.unwrap();
    let active = warehouses.list_warehouses(false).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, keep.id);
    assert_eq!(warehouses.list_warehouses(true).await.unwrap().len(), 2);

    assert_matches!(
        warehouses
            .update_warehouse(Uuid::new_v4(), UpdateWarehouse::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn location_scope_limits_a_cycle_count() {
    let t = TestEngine::new().await;
    let wh = t.warehouse("WH1").await;
    let other = t.warehouse("WH2").await;
    let warehouses = &t.engine.warehouses;

    let aisle = warehouses
        .create_location(CreateLocation {
            warehouse_id: wh.id,
            code: "a-01".into(),
            name: "Aisle 1".into(),
            zone: Some("pick".into()),
        })
        .await
        .unwrap();
    assert_eq!(aisle.code, "A-01");
    assert_matches!(
        warehouses
            .create_location(CreateLocation {
                warehouse_id: wh.id,
                code: "A-01".into(),
                name: "Again".into(),
                zone: None,
            })
            .await,
        Err(ServiceError::Conflict(_))
    );

    let shelved = Uuid::new_v4();
    let loose = Uuid::new_v4();
    t.receive(shelved, wh.id, 6).await;
    t.receive(loose, wh.id, 2).await;

    let ledger = &t.engine.ledger;
    let record = ledger.set_default_location(shelved, wh.id, aisle.id).await.unwrap();
    assert_eq!(record.location_id, Some(aisle.id));
    assert_matches!(
        ledger.set_default_location(loose, other.id, aisle.id).await,
        Err(ServiceError::ValidationError(_))
    );

    let count = t
        .engine
        .counts
        .create_count(CreateInventoryCount {
            warehouse_id: wh.id,
            count_type: CountType::Cycle,
            location_id: Some(aisle.id),
            category: None,
            brand: None,
            product_ids: None,
            notes: None,
            created_by: None,
        })
        .await
        .unwrap();
    assert_eq!(count.items.len(), 1);
    assert_eq!(count.items[0].product_id, shelved);
    assert_eq!(count.items[0].location_id, Some(aisle.id));

    warehouses.deactivate_location(aisle.id).await.unwrap();
    assert!(warehouses.list_locations(wh.id, false).await.unwrap().is_empty());
    assert_eq!(warehouses.list_locations(wh.id, true).await.unwrap().len(), 1);
}
