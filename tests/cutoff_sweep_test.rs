mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use campus_connect_api::{
    entities::{
        batch::{self, BatchStatus},
        order::{self, OrderStatus},
    },
    services::{orders::CreateOrderFromCartRequest, sweeper::CutoffSweeper},
};
use common::{seed_address, seed_cart, seed_product, seed_shop, seed_slot, TestApp};

fn sweeper(app: &TestApp) -> CutoffSweeper {
    CutoffSweeper::new(
        app.state.db.clone(),
        app.state.services.batches.clone(),
        Duration::from_secs(60),
    )
}

/// Places an order into a fresh open batch and rewinds that batch's cutoff
/// into the past so a sweep will pick it up.
async fn overdue_batch_with_order(app: &TestApp, shop_id: Uuid) -> Uuid {
    let product = seed_product(app, shop_id, "Sandwich", dec!(45.00), 0, 20).await;
    let user_id = Uuid::new_v4();
    let address = seed_address(app, user_id).await;
    seed_cart(app, user_id, shop_id, &[(product.id, 1)]).await;

    let placed = app
        .state
        .services
        .orders
        .create_order_from_cart(CreateOrderFromCartRequest {
            user_id,
            shop_id,
            payment_method: "cod".to_string(),
            delivery_address_id: address.id,
        })
        .await
        .unwrap();
    let batch_id = placed.batch_id.unwrap();

    let overdue = batch::Entity::find_by_id(batch_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    let mut active: batch::ActiveModel = overdue.into();
    active.cutoff_time = Set(Utc::now() - ChronoDuration::minutes(5));
    active.update(app.db()).await.unwrap();

    batch_id
}

#[tokio::test]
async fn sweep_locks_batches_past_their_cutoff() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;

    let batch_id = overdue_batch_with_order(&app, shop.id).await;

    let locked = sweeper(&app).sweep_once(Utc::now()).await.unwrap();
    assert_eq!(locked, 1);

    let after = batch::Entity::find_by_id(batch_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.status, BatchStatus::Locked);

    // Members went through the normal lock path, OTPs included
    let members = order::Entity::find()
        .filter(order::Column::BatchId.eq(batch_id))
        .all(app.db())
        .await
        .unwrap();
    assert!(!members.is_empty());
    for member in members {
        assert_eq!(member.order_status, OrderStatus::Batched);
        assert!(member.delivery_otp.is_some());
    }
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;

    overdue_batch_with_order(&app, shop.id).await;

    assert_eq!(sweeper(&app).sweep_once(Utc::now()).await.unwrap(), 1);
    assert_eq!(sweeper(&app).sweep_once(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_ignores_batches_whose_cutoff_is_ahead() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;

    let product = seed_product(&app, shop.id, "Omelette", dec!(40.00), 0, 20).await;
    let user_id = Uuid::new_v4();
    let address = seed_address(&app, user_id).await;
    seed_cart(&app, user_id, shop.id, &[(product.id, 1)]).await;
    let placed = app
        .state
        .services
        .orders
        .create_order_from_cart(CreateOrderFromCartRequest {
            user_id,
            shop_id: shop.id,
            payment_method: "cod".to_string(),
            delivery_address_id: address.id,
        })
        .await
        .unwrap();

    assert_eq!(sweeper(&app).sweep_once(Utc::now()).await.unwrap(), 0);

    let batch = batch::Entity::find_by_id(placed.batch_id.unwrap())
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Open);
}
