use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, JoinType,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        batch::{self, BatchStatus, Entity as BatchEntity},
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        shop::{self, Entity as ShopEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// One batch row on the vendor dashboard.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchSummary {
    pub id: Uuid,
    pub status: BatchStatus,
    pub cutoff_time: DateTime<Utc>,
    pub order_count: u64,
    /// Item totals plus delivery fees minus platform fees, rounded to 2 dp.
    pub total_earnings: Decimal,
    /// Packing summary, present for locked and in-transit batches.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<PackingLine>,
}

/// Per-product quantity across a batch's member orders.
#[derive(Debug, Serialize, Deserialize)]
pub struct PackingLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VendorDashboard {
    pub open_batch: Option<BatchSummary>,
    pub active_batches: Vec<BatchSummary>,
}

/// Service governing the batch state machine and per-order status
/// synchronization. All writers of `batches.status` live here.
#[derive(Clone)]
pub struct BatchService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl BatchService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Locks an open batch: membership freezes, member orders move to
    /// `batched`, and each receives a fresh delivery OTP.
    #[instrument(skip(self), fields(batch_id = %batch_id, shop_id = %shop_id))]
    pub async fn lock_batch(
        &self,
        batch_id: Uuid,
        shop_id: Uuid,
    ) -> Result<batch::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let batch = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        if batch.shop_id != shop_id {
            return Err(ServiceError::Unauthorized(
                "Batch does not belong to this shop".to_string(),
            ));
        }

        if !batch.status.can_transition_to(BatchStatus::Locked) {
            return Err(ServiceError::Conflict(format!(
                "Cannot lock batch in status '{}'",
                batch.status
            )));
        }

        let members = OrderEntity::find()
            .filter(order::Column::BatchId.eq(batch_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::New))
            .all(&txn)
            .await?;
        let order_count = members.len() as u64;

        let now = Utc::now();
        for member in members {
            let mut active: order::ActiveModel = member.into();
            active.order_status = Set(OrderStatus::Batched);
            active.delivery_otp = Set(Some(generate_delivery_otp()));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Locked);
        active.updated_at = Set(Some(now));
        let locked = active.update(&txn).await?;

        txn.commit().await?;

        info!(batch_id = %batch_id, order_count, "Batch locked");
        if let Err(e) = self
            .event_sender
            .send(Event::BatchLocked {
                batch_id,
                order_count,
            })
            .await
        {
            warn!(error = %e, batch_id = %batch_id, "Failed to send batch locked event");
        }

        Ok(locked)
    }

    /// Marks a locked batch as departed; member orders go out for delivery,
    /// optionally stamped with the runner carrying them.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn start_delivery(
        &self,
        batch_id: Uuid,
        runner_id: Option<Uuid>,
    ) -> Result<batch::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let batch = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        if batch.status != BatchStatus::Locked {
            return Err(ServiceError::Conflict(format!(
                "Cannot dispatch batch in status '{}'",
                batch.status
            )));
        }

        let members = OrderEntity::find()
            .filter(order::Column::BatchId.eq(batch_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Batched))
            .all(&txn)
            .await?;

        let now = Utc::now();
        for member in members {
            let mut active: order::ActiveModel = member.into();
            active.order_status = Set(OrderStatus::OutForDelivery);
            if runner_id.is_some() {
                active.assigned_to = Set(runner_id);
            }
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::InTransit);
        active.updated_at = Set(Some(now));
        let dispatched = active.update(&txn).await?;

        txn.commit().await?;

        info!(batch_id = %batch_id, "Batch dispatched");
        if let Err(e) = self.event_sender.send(Event::BatchDispatched { batch_id }).await {
            warn!(error = %e, batch_id = %batch_id, "Failed to send batch dispatched event");
        }

        Ok(dispatched)
    }

    /// Completes an in-transit batch. Every member order must already be
    /// individually OTP-verified; pending orders block completion.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn complete_batch(&self, batch_id: Uuid) -> Result<batch::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let batch = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        if batch.status != BatchStatus::InTransit {
            return Err(ServiceError::Conflict(format!(
                "Cannot complete batch in status '{}'",
                batch.status
            )));
        }

        let pending = OrderEntity::find()
            .filter(order::Column::BatchId.eq(batch_id))
            .filter(order::Column::OrderStatus.eq(OrderStatus::OutForDelivery))
            .count(&txn)
            .await?;

        if pending > 0 {
            return Err(ServiceError::Conflict(format!(
                "{} orders still pending OTP verification",
                pending
            )));
        }

        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Completed);
        active.updated_at = Set(Some(Utc::now()));
        let completed = active.update(&txn).await?;

        txn.commit().await?;

        info!(batch_id = %batch_id, "Batch completed");
        if let Err(e) = self.event_sender.send(Event::BatchCompleted { batch_id }).await {
            warn!(error = %e, batch_id = %batch_id, "Failed to send batch completed event");
        }

        Ok(completed)
    }

    /// Aborts a locked or in-transit batch. Member orders not already in a
    /// terminal state are cancelled and their OTPs cleared.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn cancel_batch(
        &self,
        batch_id: Uuid,
        reason: Option<String>,
    ) -> Result<batch::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let batch = BatchEntity::find_by_id(batch_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))?;

        if !matches!(batch.status, BatchStatus::Locked | BatchStatus::InTransit) {
            return Err(ServiceError::Conflict(format!(
                "Cannot cancel batch in status '{}'",
                batch.status
            )));
        }

        let members = OrderEntity::find()
            .filter(order::Column::BatchId.eq(batch_id))
            .filter(
                order::Column::OrderStatus
                    .is_in([OrderStatus::New, OrderStatus::Batched, OrderStatus::OutForDelivery]),
            )
            .all(&txn)
            .await?;

        let now = Utc::now();
        for member in members {
            let order_id = member.id;
            let old_status = member.order_status;
            let mut active: order::ActiveModel = member.into();
            active.order_status = Set(OrderStatus::Cancelled);
            active.delivery_otp = Set(None);
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;

            if let Err(e) = self
                .event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: OrderStatus::Cancelled.to_string(),
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send order status changed event");
            }
        }

        let mut active: batch::ActiveModel = batch.into();
        active.status = Set(BatchStatus::Cancelled);
        active.cancel_reason = Set(reason.clone());
        active.updated_at = Set(Some(now));
        let cancelled = active.update(&txn).await?;

        txn.commit().await?;

        info!(batch_id = %batch_id, ?reason, "Batch cancelled");
        if let Err(e) = self
            .event_sender
            .send(Event::BatchCancelled { batch_id, reason })
            .await
        {
            warn!(error = %e, batch_id = %batch_id, "Failed to send batch cancelled event");
        }

        Ok(cancelled)
    }

    /// Read-only aggregation for the vendor's batch screen: the open batch
    /// plus everything locked or on the road.
    #[instrument(skip(self), fields(shop_id = %shop_id))]
    pub async fn vendor_dashboard(&self, shop_id: Uuid) -> Result<VendorDashboard, ServiceError> {
        let db = &*self.db;

        let shop = ShopEntity::find_by_id(shop_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shop {} not found", shop_id)))?;

        let open = BatchEntity::find()
            .filter(batch::Column::ShopId.eq(shop_id))
            .filter(batch::Column::Status.eq(BatchStatus::Open))
            .order_by_asc(batch::Column::CutoffTime)
            .one(db)
            .await?;

        let open_batch = match open {
            Some(b) => Some(self.summarize_batch(&shop, b, false).await?),
            None => None,
        };

        let active = BatchEntity::find()
            .filter(batch::Column::ShopId.eq(shop_id))
            .filter(
                batch::Column::Status.is_in([BatchStatus::Locked, BatchStatus::InTransit]),
            )
            .order_by_asc(batch::Column::CutoffTime)
            .all(db)
            .await?;

        let mut active_batches = Vec::with_capacity(active.len());
        for b in active {
            active_batches.push(self.summarize_batch(&shop, b, true).await?);
        }

        Ok(VendorDashboard {
            open_batch,
            active_batches,
        })
    }

    async fn summarize_batch(
        &self,
        shop: &shop::Model,
        batch: batch::Model,
        with_items: bool,
    ) -> Result<BatchSummary, ServiceError> {
        let db = &*self.db;

        let orders = OrderEntity::find()
            .filter(order::Column::BatchId.eq(batch.id))
            .filter(order::Column::OrderStatus.ne(OrderStatus::Cancelled))
            .all(db)
            .await?;

        let order_count = orders.len() as u64;
        let total_earnings: Decimal = orders
            .iter()
            .map(|o| o.total_price - shop.platform_fee)
            .sum::<Decimal>()
            .round_dp(2);

        let items = if with_items {
            self.packing_summary(batch.id).await?
        } else {
            Vec::new()
        };

        Ok(BatchSummary {
            id: batch.id,
            status: batch.status,
            cutoff_time: batch.cutoff_time,
            order_count,
            total_earnings,
            items,
        })
    }

    /// Item quantities grouped by product across a batch, for packing.
    async fn packing_summary(&self, batch_id: Uuid) -> Result<Vec<PackingLine>, ServiceError> {
        let db = &*self.db;

        let lines = OrderItemEntity::find()
            .join(JoinType::InnerJoin, order_item::Relation::Order.def())
            .filter(order::Column::BatchId.eq(batch_id))
            .filter(order::Column::OrderStatus.ne(OrderStatus::Cancelled))
            .all(db)
            .await?;

        let mut by_product: HashMap<Uuid, PackingLine> = HashMap::new();
        for line in lines {
            by_product
                .entry(line.product_id)
                .and_modify(|p| p.quantity += line.quantity as i64)
                .or_insert(PackingLine {
                    product_id: line.product_id,
                    product_name: line.product_name,
                    quantity: line.quantity as i64,
                });
        }

        let mut summary: Vec<PackingLine> = by_product.into_values().collect();
        summary.sort_by(|a, b| a.product_name.cmp(&b.product_name));
        Ok(summary)
    }

    /// Finds the open batch for `(shop, cutoff)`, creating it when absent.
    /// Two admissions racing past the lookup are resolved by the partial
    /// unique index: the loser re-reads the winner's row. Returns the batch
    /// and whether this call created it.
    pub async fn find_or_create_open_batch<C: ConnectionTrait>(
        conn: &C,
        shop_id: Uuid,
        cutoff_time: DateTime<Utc>,
    ) -> Result<(batch::Model, bool), ServiceError> {
        let existing = BatchEntity::find()
            .filter(batch::Column::ShopId.eq(shop_id))
            .filter(batch::Column::Status.eq(BatchStatus::Open))
            .filter(batch::Column::CutoffTime.eq(cutoff_time))
            .one(conn)
            .await?;

        if let Some(found) = existing {
            return Ok((found, false));
        }

        let active = batch::ActiveModel {
            id: Set(Uuid::new_v4()),
            shop_id: Set(shop_id),
            status: Set(BatchStatus::Open),
            cutoff_time: Set(cutoff_time),
            cancel_reason: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        match active.insert(conn).await {
            Ok(created) => Ok((created, true)),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let winner = BatchEntity::find()
                    .filter(batch::Column::ShopId.eq(shop_id))
                    .filter(batch::Column::Status.eq(BatchStatus::Open))
                    .filter(batch::Column::CutoffTime.eq(cutoff_time))
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(
                            "Open batch vanished after unique-constraint race".to_string(),
                        )
                    })?;
                Ok((winner, false))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Generates a 4-digit numeric delivery OTP from the OS CSPRNG, falling back
/// to the thread-local generator when the OS source is unavailable.
pub(crate) fn generate_delivery_otp() -> String {
    let mut buf = [0u8; 4];
    let value = if rand::rngs::OsRng.try_fill_bytes(&mut buf).is_ok() {
        u32::from_le_bytes(buf) % 10_000
    } else {
        rand::thread_rng().gen_range(0..10_000)
    };
    format!("{:04}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_is_four_numeric_digits() {
        for _ in 0..100 {
            let otp = generate_delivery_otp();
            assert_eq!(otp.len(), 4);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn otps_vary() {
        let distinct: std::collections::HashSet<String> =
            (0..50).map(|_| generate_delivery_otp()).collect();
        assert!(distinct.len() > 1);
    }
}
