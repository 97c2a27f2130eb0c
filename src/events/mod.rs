use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderDelivered {
        order_id: Uuid,
        shop_id: Uuid,
    },

    // Batch lifecycle events
    BatchOpened {
        batch_id: Uuid,
        shop_id: Uuid,
    },
    BatchLocked {
        batch_id: Uuid,
        order_count: u64,
    },
    BatchDispatched {
        batch_id: Uuid,
    },
    BatchCompleted {
        batch_id: Uuid,
    },
    BatchCancelled {
        batch_id: Uuid,
        reason: Option<String>,
    },

    // Inventory events
    StockReserved {
        product_id: Uuid,
        quantity: i32,
    },
    StockDepleted {
        product_id: Uuid,
        shop_id: Uuid,
    },
}

/// Drains the event channel, logging each event. Downstream consumers
/// (search indexer, broadcast fan-out) subscribe here when they exist.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id = %order_id, %old_status, %new_status, "Order status changed");
            }
            Event::BatchLocked {
                batch_id,
                order_count,
            } => {
                info!(batch_id = %batch_id, order_count, "Batch locked");
            }
            Event::BatchCancelled { batch_id, reason } => {
                info!(batch_id = %batch_id, ?reason, "Batch cancelled");
            }
            other => {
                debug!(event = ?other, "Event processed");
            }
        }
    }
    info!("Event processor stopped");
}
