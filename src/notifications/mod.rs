use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum notifications retained per user.
const USER_LIST_CAP: isize = 1000;

/// Represents a delivered notification
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// What a caller hands to `publish`; the service stamps identity and time.
#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub notification_type: NotificationType,
}

/// Types of notifications
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderUpdate,
    BatchUpdate,
    DeliveryUpdate,
    InventoryAlert,
    SystemMessage,
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for notification delivery backends
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn publish(
        &self,
        user_id: Uuid,
        payload: NotificationPayload,
    ) -> Result<Notification, NotificationError>;

    async fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError>;
}

/// Redis-backed notification service. Each user has a sorted set of recent
/// notifications plus a pub/sub channel for live listeners.
#[derive(Clone)]
pub struct RedisNotificationService {
    redis: Arc<Client>,
}

impl RedisNotificationService {
    pub fn new(redis: Arc<Client>) -> Self {
        Self { redis }
    }

    fn user_key(user_id: Uuid) -> String {
        format!("notifications:user:{}", user_id)
    }

    fn channel_key(user_id: Uuid) -> String {
        format!("notifications:live:{}", user_id)
    }
}

#[async_trait]
impl NotificationService for RedisNotificationService {
    async fn publish(
        &self,
        user_id: Uuid,
        payload: NotificationPayload,
    ) -> Result<Notification, NotificationError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: payload.title,
            message: payload.message,
            action_url: payload.action_url,
            notification_type: payload.notification_type,
            read: false,
            created_at: Utc::now(),
        };

        let mut conn = self.redis.get_async_connection().await?;
        let user_key = Self::user_key(user_id);
        let json = serde_json::to_string(&notification)?;

        let _: () = conn
            .zadd(&user_key, &json, notification.created_at.timestamp())
            .await?;
        let _: () = conn
            .zremrangebyrank(&user_key, 0, -(USER_LIST_CAP + 1))
            .await?;
        // Live listeners are optional; delivery to the stored list is what counts.
        let _: i32 = conn.publish(Self::channel_key(user_id), &json).await?;

        Ok(notification)
    }

    async fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let mut conn = self.redis.get_async_connection().await?;
        let entries: Vec<String> = conn
            .zrevrange(Self::user_key(user_id), 0, limit as isize - 1)
            .await?;

        let mut notifications = Vec::with_capacity(entries.len());
        for entry in entries {
            notifications.push(serde_json::from_str(&entry)?);
        }
        Ok(notifications)
    }
}

/// In-memory notification service used by tests and when redis is disabled.
#[derive(Clone, Default)]
pub struct InMemoryNotificationService {
    inner: Arc<RwLock<HashMap<Uuid, Vec<Notification>>>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn publish(
        &self,
        user_id: Uuid,
        payload: NotificationPayload,
    ) -> Result<Notification, NotificationError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            title: payload.title,
            message: payload.message,
            action_url: payload.action_url,
            notification_type: payload.notification_type,
            read: false,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn recent_for_user(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Notification>, NotificationError> {
        let guard = self.inner.read().await;
        let mut list = guard.get(&user_id).cloned().unwrap_or_default();
        list.reverse();
        list.truncate(limit);
        Ok(list)
    }
}

/// Fire-and-forget publisher used by the domain services. Publish failures
/// must never fail the parent operation; they are logged and swallowed here.
#[derive(Clone)]
pub struct Notifier {
    service: Arc<dyn NotificationService>,
}

impl Notifier {
    pub fn new(service: Arc<dyn NotificationService>) -> Self {
        Self { service }
    }

    pub async fn notify_best_effort(&self, user_id: Uuid, payload: NotificationPayload) {
        match self.service.publish(user_id, payload).await {
            Ok(notification) => {
                debug!(user_id = %user_id, notification_id = %notification.id, "Notification published");
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to publish notification; continuing");
            }
        }
    }

    pub fn service(&self) -> Arc<dyn NotificationService> {
        self.service.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(message: &str) -> NotificationPayload {
        NotificationPayload {
            title: "New order".to_string(),
            message: message.to_string(),
            action_url: Some("/vendor/orders".to_string()),
            notification_type: NotificationType::OrderUpdate,
        }
    }

    #[tokio::test]
    async fn in_memory_publish_and_read_back() {
        let service = InMemoryNotificationService::new();
        let user = Uuid::new_v4();

        service.publish(user, payload("first")).await.unwrap();
        service.publish(user, payload("second")).await.unwrap();

        let recent = service.recent_for_user(user, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert!(!recent[0].read);
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let service = InMemoryNotificationService::new();
        let user = Uuid::new_v4();

        for i in 0..5 {
            service.publish(user, payload(&format!("n{}", i))).await.unwrap();
        }

        let recent = service.recent_for_user(user, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "n4");
    }
}
