use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use tracing::{error, info, instrument, warn};

use crate::{
    entities::batch::{self, BatchStatus, Entity as BatchEntity},
    errors::ServiceError,
    services::batches::BatchService,
};

/// Periodic job enforcing cutoffs: any batch still open after its cutoff
/// time is locked through the same path a vendor would use. Each pass is
/// idempotent; a pass that finds nothing does nothing.
pub struct CutoffSweeper {
    db: Arc<DatabaseConnection>,
    batches: Arc<BatchService>,
    interval: Duration,
}

impl CutoffSweeper {
    pub fn new(db: Arc<DatabaseConnection>, batches: Arc<BatchService>, interval: Duration) -> Self {
        Self {
            db,
            batches,
            interval,
        }
    }

    /// Runs the sweep loop until the process shuts down.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "Cutoff sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.sweep_once(Utc::now()).await {
                Ok(0) => {}
                Ok(locked) => info!(locked, "Cutoff sweep locked overdue batches"),
                Err(e) => error!(error = %e, "Cutoff sweep failed"),
            }
        }
    }

    /// One sweep pass: locks every open batch whose cutoff has passed.
    /// A failure on one batch is logged and does not stop the rest.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let overdue = BatchEntity::find()
            .filter(batch::Column::Status.eq(BatchStatus::Open))
            .filter(batch::Column::CutoffTime.lte(now))
            .order_by_asc(batch::Column::CutoffTime)
            .all(&*self.db)
            .await?;

        let mut locked = 0u64;
        for b in overdue {
            match self.batches.lock_batch(b.id, b.shop_id).await {
                Ok(_) => locked += 1,
                // Another actor may have moved the batch since the read.
                Err(ServiceError::Conflict(msg)) => {
                    warn!(batch_id = %b.id, %msg, "Batch moved before sweep could lock it");
                }
                Err(e) => {
                    error!(batch_id = %b.id, error = %e, "Failed to lock overdue batch");
                }
            }
        }

        Ok(locked)
    }
}
