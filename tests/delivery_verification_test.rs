mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use campus_connect_api::{
    entities::order::{self, OrderStatus, PaymentStatus},
    errors::ServiceError,
    notifications::NotificationService,
    services::orders::CreateOrderFromCartRequest,
};
use common::{seed_address, seed_cart, seed_product, seed_shop, seed_slot, TestApp};

/// Places one order, walks its batch to in-transit, and returns the order
/// model with its live OTP.
async fn order_out_for_delivery(app: &TestApp, shop_id: Uuid) -> order::Model {
    let product = seed_product(app, shop_id, "Filter Coffee", dec!(30.00), 0, 50).await;
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

    app.state
        .services
        .batches
        .lock_batch(batch_id, shop_id)
        .await
        .unwrap();
    app.state
        .services
        .batches
        .start_delivery(batch_id, None)
        .await
        .unwrap();

    order::Entity::find_by_id(placed.id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn wrong_otp_is_a_retryable_failure_not_an_error() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let order = order_out_for_delivery(&app, shop.id).await;
    let otp = order.delivery_otp.clone().unwrap();
    let wrong = if otp == "0000" { "9999" } else { "0000" };

    let outcome = app
        .state
        .services
        .delivery
        .verify_order_otp(order.id, wrong, shop.id)
        .await
        .unwrap();
    assert!(!outcome.success);

    // Nothing changed; the customer can try again
    let after = order::Entity::find_by_id(order.id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.order_status, OrderStatus::OutForDelivery);
    assert_eq!(after.delivery_otp, Some(otp));
    assert_eq!(after.actual_delivery_time, None);
}

#[tokio::test]
async fn matching_otp_completes_the_order_once() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let order = order_out_for_delivery(&app, shop.id).await;
    let otp = order.delivery_otp.clone().unwrap();

    let outcome = app
        .state
        .services
        .delivery
        .verify_order_otp(order.id, &otp, shop.id)
        .await
        .unwrap();
    assert!(outcome.success);

    let after = order::Entity::find_by_id(order.id)
        .one(app.db())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.order_status, OrderStatus::Completed);
    assert_eq!(after.delivery_otp, None, "OTP is single use");
    assert!(after.actual_delivery_time.is_some());
    // Cash handed over at the door
    assert_eq!(after.payment_status, PaymentStatus::Paid);

    // Replaying the same OTP fails: the order is no longer out for delivery
    let result = app
        .state
        .services
        .delivery
        .verify_order_otp(order.id, &otp, shop.id)
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    // The customer heard about the delivery
    let inbox = app
        .notifications
        .recent_for_user(order.user_id, 10)
        .await
        .unwrap();
    assert!(inbox.iter().any(|n| n.title == "Order delivered"));
}

#[tokio::test]
async fn verification_checks_shop_ownership_and_existence() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let order = order_out_for_delivery(&app, shop.id).await;
    let otp = order.delivery_otp.clone().unwrap();

    let result = app
        .state
        .services
        .delivery
        .verify_order_otp(order.id, &otp, Uuid::new_v4())
        .await;
    assert_matches!(result, Err(ServiceError::Unauthorized(_)));

    let result = app
        .state
        .services
        .delivery
        .verify_order_otp(Uuid::new_v4(), &otp, shop.id)
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn orders_not_out_for_delivery_cannot_be_verified() {
    let app = TestApp::new().await;
    let shop = seed_shop(&app, true).await;
    seed_slot(&app, shop.id, 540).await;
    let product = seed_product(&app, shop.id, "Pakora", dec!(20.00), 0, 10).await;

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

    // Still new: no OTP exists yet
    let result = app
        .state
        .services
        .delivery
        .verify_order_otp(placed.id, "1234", shop.id)
        .await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));
}
