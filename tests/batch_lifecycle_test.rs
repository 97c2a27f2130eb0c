mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use campus_connect_api::{
    entities::{
        batch::{self, BatchStatus},
        order::{self, OrderStatus},
    },
    errors::ServiceError,
    services::orders::{CreateOrderFromCartRequest, OrderResponse},
};
use common::{seed_address, seed_cart, seed_product, seed_shop, seed_slot, TestApp};

async fn place_order(app: &TestApp, shop_id: Uuid, product_id: Uuid, qty: i32) -> OrderResponse {
    let user_id = Uuid::new_v4();
    let address = seed_address(app, user_id).await;
    seed_cart(app, user_id, shop_id, &[(product_id, qty)]).await;
    app.state
        .services
        .orders
        .create_order_from_cart(CreateOrderFromCartRequest {
            user_id,
            shop_id,
            payment_method: "cod".to_string(),
            delivery_address_id: address.id,
        })
        .await
        .expect("order should be created")
}

async fn batch_status(app: &TestApp, batch_id: Uuid) -> BatchStatus {
    batch::Entity::find_by_id(batch_id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap()
        .status
}

async fn member_orders(app: &TestApp, batch_id: Uuid) -> Vec<order::Model> {
    order::Entity::find()
        .filter(order::Column::BatchId.eq(batch_id))
        .all(app.db())
        .await
        .unwrap()
}

#[tokio::test]
async fn lock_freezes_membership_and_issues_otps() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Dosa", dec!(50.00), 0, 50).await;

    let first = place_order(&app, shop.id, product.id, 1).await;
    let second = place_order(&app, shop.id, product.id, 2).await;
    let batch_id = first.batch_id.unwrap();
    assert_eq!(second.batch_id.unwrap(), batch_id);

    let locked = app
        .state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();
    assert_eq!(locked.status, BatchStatus::Locked);

    for member in member_orders(&app, batch_id).await {
        assert_eq!(member.order_status, OrderStatus::Batched);
        let otp = member.delivery_otp.expect("locked orders carry an OTP");
        assert_eq!(otp.len(), 4);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));
    }
}

#[tokio::test]
async fn lock_is_rejected_when_not_open_or_not_owned() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Idli", dec!(40.00), 0, 50).await;

    let order = place_order(&app, shop.id, product.id, 1).await;
    let batch_id = order.batch_id.unwrap();

    // Wrong shop cannot lock
    let result = app
        .state
        .services
        .batches
        .lock_batch(batch_id, Uuid::new_v4())
        .await;
    assert_matches!(result, Err(ServiceError::Unauthorized(_)));
    assert_eq!(batch_status(&app, batch_id).await, BatchStatus::Open);

    // First lock succeeds, second conflicts and leaves status locked
    app.state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();
    let result = app
        .state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));
    assert_eq!(batch_status(&app, batch_id).await, BatchStatus::Locked);

    // Missing batch
    let result = app
        .state
        .services
        .batches
        .lock_batch(Uuid::new_v4(), shop.id)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn dispatch_moves_members_out_for_delivery() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Vada Pav", dec!(25.00), 0, 50).await;

    let order = place_order(&app, shop.id, product.id, 1).await;
    let batch_id = order.batch_id.unwrap();

    // Dispatch before lock is illegal
    let result = app
        .state
        .services
        .batches
        .start_delivery(batch_id, None)
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    app.state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();

    let runner = Uuid::new_v4();
    let dispatched = app
        .state
        .services
        .batches
        .start_delivery(batch_id, Some(runner))
        .await
        .unwrap();
    assert_eq!(dispatched.status, BatchStatus::InTransit);

    for member in member_orders(&app, batch_id).await {
        assert_eq!(member.order_status, OrderStatus::OutForDelivery);
        assert_eq!(member.assigned_to, Some(runner));
    }
}

#[tokio::test]
async fn completion_is_blocked_while_orders_are_pending() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Paratha", dec!(35.00), 0, 50).await;

    let first = place_order(&app, shop.id, product.id, 1).await;
    let second = place_order(&app, shop.id, product.id, 1).await;
    let batch_id = first.batch_id.unwrap();

    app.state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();
    app.state
        .services
        .batches
        .start_delivery(batch_id, None)
        .await
        .unwrap();

    // Both orders still pending verification
    let result = app.state.services.batches.complete_batch(batch_id).await;
    assert_matches!(
        result,
        Err(ServiceError::Conflict(msg)) if msg.contains("2 orders still pending")
    );
    assert_eq!(batch_status(&app, batch_id).await, BatchStatus::InTransit);

    // Verify both, then completion goes through
    for response in [first, second] {
        let member = order::Entity::find_by_id(response.id)
            .one(app.db())
            .await
            .unwrap()
            .unwrap();
        let otp = member.delivery_otp.unwrap();
        let outcome = app
            .state
            .services
            .delivery
            .verify_order_otp(member.id, &otp, shop.id)
            .await
            .unwrap();
        assert!(outcome.success);
    }

    let completed = app
        .state
        .services
        .batches
        .complete_batch(batch_id)
        .await
        .unwrap();
    assert_eq!(completed.status, BatchStatus::Completed);
}

#[tokio::test]
async fn cancellation_propagates_to_members_and_clears_otps() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Thali", dec!(90.00), 0, 50).await;

    let order = place_order(&app, shop.id, product.id, 1).await;
    let batch_id = order.batch_id.unwrap();

    // An open batch is not cancellable; it simply stops admitting when locked
    let result = app
        .state
        .services
        .batches
        .cancel_batch(batch_id, Some("rain".to_string()))
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    place_order(&app, shop.id, product.id, 1).await;
    place_order(&app, shop.id, product.id, 2).await;

    app.state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();

    let cancelled = app
        .state
        .services
        .batches
        .cancel_batch(batch_id, Some("vendor unavailable".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("vendor unavailable"));

    let members = member_orders(&app, batch_id).await;
    assert_eq!(members.len(), 3);
    for member in members {
        assert_eq!(member.order_status, OrderStatus::Cancelled);
        assert_eq!(member.delivery_otp, None);
    }
}

#[tokio::test]
async fn dashboard_reports_counts_earnings_and_packing_summary() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let dosa = seed_product(&app, shop.id, "Dosa", dec!(50.00), 0, 50).await;
    let chai = seed_product(&app, shop.id, "Chai", dec!(10.00), 0, 50).await;

    let first = place_order(&app, shop.id, dosa.id, 2).await;
    let batch_id = first.batch_id.unwrap();

    // Second order in the same batch with a different product mix
    let user_id = Uuid::new_v4();
    let address = seed_address(&app, user_id).await;
    seed_cart(&app, user_id, shop.id, &[(dosa.id, 1), (chai.id, 3)]).await;
    app.state
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

    app.state
        .services
        .batches
        .lock_batch(batch_id, shop.id)
        .await
        .unwrap();

    let dashboard = app
        .state
        .services
        .batches
        .vendor_dashboard(shop.id)
        .await
        .unwrap();

    assert!(dashboard.open_batch.is_none());
    assert_eq!(dashboard.active_batches.len(), 1);
    let summary = &dashboard.active_batches[0];
    assert_eq!(summary.order_count, 2);

    // Order totals: (100 + 10 delivery) + (50 + 30 + 10 delivery) = 200.00;
    // minus platform fee 5.00 per order => 190.00
    assert_eq!(summary.total_earnings, dec!(190.00));

    let dosa_line = summary
        .items
        .iter()
        .find(|l| l.product_id == dosa.id)
        .expect("dosa in packing summary");
    assert_eq!(dosa_line.quantity, 3);
    let chai_line = summary
        .items
        .iter()
        .find(|l| l.product_id == chai.id)
        .expect("chai in packing summary");
    assert_eq!(chai_line.quantity, 3);

    // A fresh admission opens a new batch which shows up as the open batch
    place_order(&app, shop.id, chai.id, 1).await;
    let dashboard = app
        .state
        .services
        .batches
        .vendor_dashboard(shop.id)
        .await
        .unwrap();
    let open = dashboard.open_batch.expect("new open batch");
    assert_eq!(open.status, BatchStatus::Open);
    assert_eq!(open.order_count, 1);
    assert!(open.items.is_empty(), "open batches carry no packing summary");
}
