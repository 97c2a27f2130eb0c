pub mod batch_slots;
pub mod batches;
pub mod orders;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::{
    config::AppConfig,
    events::EventSender,
    notifications::Notifier,
    services::{
        batch_slots::BatchSlotService, batches::BatchService, delivery::DeliveryService,
        orders::OrderService,
    },
};

/// Aggregated services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub batches: Arc<BatchService>,
    pub orders: Arc<OrderService>,
    pub delivery: Arc<DeliveryService>,
    pub batch_slots: Arc<BatchSlotService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifier: Notifier,
        cfg: &AppConfig,
    ) -> Self {
        let batches = Arc::new(BatchService::new(db.clone(), event_sender.clone()));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            notifier.clone(),
            cfg.timezone(),
            cfg.order_id_prefix.clone(),
        ));
        let delivery = Arc::new(DeliveryService::new(
            db.clone(),
            event_sender,
            notifier,
        ));
        let batch_slots = Arc::new(BatchSlotService::new(db));

        Self {
            batches,
            orders,
            delivery,
            batch_slots,
        }
    }
}
