use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A student order against one shop. Orders are never physically deleted;
/// history is retained through terminal states.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-readable sequential order code, e.g. "CC-000042".
    #[validate(length(min = 1, max = 20, message = "Display id must be between 1 and 20 characters"))]
    pub display_id: String,

    pub user_id: Uuid,
    pub shop_id: Uuid,
    /// Unbatched (direct-delivery) shops never populate this.
    pub batch_id: Option<Uuid>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub delivery_address_id: Uuid,
    /// Populated at batch lock, cleared on verification or cancellation.
    pub delivery_otp: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,
    pub assigned_to: Option<Uuid>,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::batch::Entity",
        from = "Column::BatchId",
        to = "super::batch::Column::Id"
    )]
    Batch,
    #[sea_orm(
        belongs_to = "super::shop::Entity",
        from = "Column::ShopId",
        to = "super::shop::Column::Id"
    )]
    Shop,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl Related<super::shop::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shop.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status enumeration. Kept in lockstep with the parent batch by the
/// batch lifecycle service: batch locked => members batched, batch in transit
/// => members out for delivery, batch cancelled => members cancelled.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "new")]
    New,
    #[sea_orm(string_value = "batched")]
    Batched,
    #[sea_orm(string_value = "out_for_delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Legal-transition table for individual orders. Only batch-driven bulk
    /// transitions and OTP verification write this field.
    pub fn allowed_transitions(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::New => &[OrderStatus::Batched, OrderStatus::Cancelled],
            OrderStatus::Batched => &[OrderStatus::OutForDelivery, OrderStatus::Cancelled],
            OrderStatus::OutForDelivery => &[OrderStatus::Completed, OrderStatus::Cancelled],
            OrderStatus::Completed | OrderStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

/// Payment status enumeration. The core records status only; gateway
/// integration lives elsewhere.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_follows_batch_progression() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Batched));
        assert!(OrderStatus::Batched.can_transition_to(OrderStatus::OutForDelivery));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn completed_orders_cannot_move() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn cancellation_allowed_before_completion() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Batched.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Cancelled));
    }
}
