use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Named monotonic counters. The order display-id sequence lives here;
/// increments happen inside the same transaction as the row that consumes
/// the value, so aborted transactions may leave gaps but never duplicates.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "id_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
