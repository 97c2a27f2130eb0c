use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{NotificationPayload, NotificationType, Notifier},
};

/// Result of an OTP check. A mismatch is a normal, retryable outcome and is
/// reported here rather than as an error.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub message: String,
}

/// Service confirming individual deliveries against the OTP issued at batch
/// lock. The only writer of `order_status` outside the batch lifecycle.
#[derive(Clone)]
pub struct DeliveryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifier: Notifier,
}

impl DeliveryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifier: Notifier,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
        }
    }

    /// Verifies a presented OTP against an out-for-delivery order.
    ///
    /// The comparison is an exact string match with no lockout; OTPs here
    /// gate handover in a low-stakes campus setting, not an adversarial
    /// guessing game. On match the order completes, the delivery time is
    /// recorded, and the OTP is cleared so it cannot be replayed.
    #[instrument(skip(self, otp), fields(order_id = %order_id, shop_id = %shop_id))]
    pub async fn verify_order_otp(
        &self,
        order_id: Uuid,
        otp: &str,
        shop_id: Uuid,
    ) -> Result<VerificationOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.shop_id != shop_id {
            return Err(ServiceError::Unauthorized(
                "Order does not belong to this shop".to_string(),
            ));
        }

        if order.order_status != OrderStatus::OutForDelivery {
            return Err(ServiceError::Conflict(format!(
                "Cannot verify an order that is not out for delivery (status: '{}')",
                order.order_status
            )));
        }

        if order.delivery_otp.as_deref() != Some(otp) {
            info!(order_id = %order_id, "OTP mismatch");
            return Ok(VerificationOutcome {
                success: false,
                message: "Incorrect OTP, please try again".to_string(),
            });
        }

        let user_id = order.user_id;
        let display_id = order.display_id.clone();
        let collect_on_delivery = order.payment_method.eq_ignore_ascii_case("cod")
            && order.payment_status == PaymentStatus::Pending;

        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(OrderStatus::Completed);
        active.actual_delivery_time = Set(Some(now));
        active.delivery_otp = Set(None);
        if collect_on_delivery {
            active.payment_status = Set(PaymentStatus::Paid);
        }
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "Delivery verified");
        if let Err(e) = self
            .event_sender
            .send(Event::OrderDelivered { order_id, shop_id })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send order delivered event");
        }

        self.notifier
            .notify_best_effort(
                user_id,
                NotificationPayload {
                    title: "Order delivered".to_string(),
                    message: format!("Order {} has been delivered", display_id),
                    action_url: Some(format!("/orders/{}", order_id)),
                    notification_type: NotificationType::DeliveryUpdate,
                },
            )
            .await;

        Ok(VerificationOutcome {
            success: true,
            message: "Delivery confirmed".to_string(),
        })
    }
}
