use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::batch_slot::{self, Entity as BatchSlotEntity},
    errors::ServiceError,
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBatchSlotRequest {
    #[validate(range(min = 0, max = 1439, message = "Cutoff must be a valid minute of day"))]
    pub cutoff_time_minutes: i32,
    pub label: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateBatchSlotRequest {
    #[validate(range(min = 0, max = 1439, message = "Cutoff must be a valid minute of day"))]
    pub cutoff_time_minutes: Option<i32>,
    pub label: Option<String>,
    pub is_active: Option<bool>,
}

/// CRUD over a shop's cutoff slot configuration. Every mutation checks that
/// the slot belongs to the calling shop.
#[derive(Clone)]
pub struct BatchSlotService {
    db: Arc<DatabaseConnection>,
}

impl BatchSlotService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(shop_id = %shop_id))]
    pub async fn create_slot(
        &self,
        shop_id: Uuid,
        request: CreateBatchSlotRequest,
    ) -> Result<batch_slot::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db;

        // New slots sort after everything the shop already has.
        let last = BatchSlotEntity::find()
            .filter(batch_slot::Column::ShopId.eq(shop_id))
            .order_by_desc(batch_slot::Column::SortOrder)
            .one(db)
            .await?;
        let sort_order = last.map(|s| s.sort_order + 1).unwrap_or(0);

        let slot = batch_slot::ActiveModel {
            id: Set(Uuid::new_v4()),
            shop_id: Set(shop_id),
            cutoff_time_minutes: Set(request.cutoff_time_minutes),
            label: Set(request.label),
            is_active: Set(request.is_active),
            sort_order: Set(sort_order),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await?;

        info!(slot_id = %slot.id, "Batch slot created");
        Ok(slot)
    }

    #[instrument(skip(self, request), fields(slot_id = %slot_id, shop_id = %shop_id))]
    pub async fn update_slot(
        &self,
        slot_id: Uuid,
        shop_id: Uuid,
        request: UpdateBatchSlotRequest,
    ) -> Result<batch_slot::Model, ServiceError> {
        request.validate()?;

        let db = &*self.db;
        let slot = self.owned_slot(slot_id, shop_id).await?;

        let mut active: batch_slot::ActiveModel = slot.into();
        if let Some(minutes) = request.cutoff_time_minutes {
            active.cutoff_time_minutes = Set(minutes);
        }
        if let Some(label) = request.label {
            active.label = Set(Some(label));
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Some(Utc::now()));

        Ok(active.update(db).await?)
    }

    #[instrument(skip(self), fields(slot_id = %slot_id, shop_id = %shop_id))]
    pub async fn delete_slot(&self, slot_id: Uuid, shop_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let slot = self.owned_slot(slot_id, shop_id).await?;
        slot.delete(db).await?;
        info!(slot_id = %slot_id, "Batch slot deleted");
        Ok(())
    }

    /// A shop's slots in display order; sort order first, cutoff minute as
    /// the tie-break.
    #[instrument(skip(self), fields(shop_id = %shop_id))]
    pub async fn list_slots(&self, shop_id: Uuid) -> Result<Vec<batch_slot::Model>, ServiceError> {
        let db = &*self.db;
        Ok(BatchSlotEntity::find()
            .filter(batch_slot::Column::ShopId.eq(shop_id))
            .order_by_asc(batch_slot::Column::SortOrder)
            .order_by_asc(batch_slot::Column::CutoffTimeMinutes)
            .all(db)
            .await?)
    }

    /// Replaces the shop's slot ordering wholesale. The submitted list must
    /// be exactly the shop's slot ids, each once; anything else rejects the
    /// request without touching a row. Resubmitting the current order is a
    /// no-op that assigns the same ranks again.
    #[instrument(skip(self, ordered_ids), fields(shop_id = %shop_id, count = ordered_ids.len()))]
    pub async fn reorder_slots(
        &self,
        shop_id: Uuid,
        ordered_ids: Vec<Uuid>,
    ) -> Result<Vec<batch_slot::Model>, ServiceError> {
        let txn = self.db.begin().await?;

        let slots = BatchSlotEntity::find()
            .filter(batch_slot::Column::ShopId.eq(shop_id))
            .all(&txn)
            .await?;

        let owned: HashSet<Uuid> = slots.iter().map(|s| s.id).collect();
        let submitted: HashSet<Uuid> = ordered_ids.iter().copied().collect();

        if submitted.len() != ordered_ids.len() {
            return Err(ServiceError::ValidationError(
                "Reorder list contains duplicate slot ids".to_string(),
            ));
        }
        if let Some(foreign) = submitted.difference(&owned).next() {
            return Err(ServiceError::ValidationError(format!(
                "Slot {} does not belong to this shop",
                foreign
            )));
        }
        if submitted.len() != owned.len() {
            return Err(ServiceError::ValidationError(format!(
                "Reorder list must cover all {} slots, got {}",
                owned.len(),
                submitted.len()
            )));
        }

        let now = Utc::now();
        for (position, slot_id) in ordered_ids.iter().enumerate() {
            let slot = slots
                .iter()
                .find(|s| s.id == *slot_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::InternalError("Slot disappeared during reorder".to_string())
                })?;
            let mut active: batch_slot::ActiveModel = slot.into();
            active.sort_order = Set(position as i32);
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        info!(shop_id = %shop_id, "Batch slots reordered");
        self.list_slots(shop_id).await
    }

    async fn owned_slot(
        &self,
        slot_id: Uuid,
        shop_id: Uuid,
    ) -> Result<batch_slot::Model, ServiceError> {
        let db = &*self.db;
        let slot = BatchSlotEntity::find_by_id(slot_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Batch slot {} not found", slot_id)))?;

        if slot.shop_id != shop_id {
            return Err(ServiceError::Unauthorized(
                "Batch slot does not belong to this shop".to_string(),
            ));
        }
        Ok(slot)
    }
}
