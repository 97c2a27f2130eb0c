use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One delivery wave for one shop. Created lazily the first time an order is
/// admitted against a cutoff window with no open batch; at most one open batch
/// exists per (shop, cutoff_time), enforced by a partial unique index.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shop_id: Uuid,
    pub status: BatchStatus,
    pub cutoff_time: DateTime<Utc>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
    #[sea_orm(
        belongs_to = "super::shop::Entity",
        from = "Column::ShopId",
        to = "super::shop::Column::Id"
    )]
    Shop,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::shop::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shop.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Batch status enumeration
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
pub enum BatchStatus {
    #[sea_orm(string_value = "open")]
    Open,
    #[sea_orm(string_value = "locked")]
    Locked,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl BatchStatus {
    /// The legal-transition table for the batch state machine. Forward-only;
    /// cancellation is reachable from every non-terminal state except that an
    /// open batch is discarded rather than cancelled.
    pub fn allowed_transitions(self) -> &'static [BatchStatus] {
        match self {
            BatchStatus::Open => &[BatchStatus::Locked, BatchStatus::Cancelled],
            BatchStatus::Locked => &[BatchStatus::InTransit, BatchStatus::Cancelled],
            BatchStatus::InTransit => &[BatchStatus::Completed, BatchStatus::Cancelled],
            BatchStatus::Completed | BatchStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        assert!(BatchStatus::Open.can_transition_to(BatchStatus::Locked));
        assert!(BatchStatus::Locked.can_transition_to(BatchStatus::InTransit));
        assert!(BatchStatus::InTransit.can_transition_to(BatchStatus::Completed));
    }

    #[test]
    fn no_status_reversal() {
        assert!(!BatchStatus::Locked.can_transition_to(BatchStatus::Open));
        assert!(!BatchStatus::InTransit.can_transition_to(BatchStatus::Locked));
        assert!(!BatchStatus::Completed.can_transition_to(BatchStatus::InTransit));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::Cancelled.can_transition_to(BatchStatus::Open));
    }

    #[test]
    fn cancellation_reachable_from_active_states() {
        assert!(BatchStatus::Locked.can_transition_to(BatchStatus::Cancelled));
        assert!(BatchStatus::InTransit.can_transition_to(BatchStatus::Cancelled));
    }
}
