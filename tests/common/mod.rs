use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use campus_connect_api::{
    config::AppConfig,
    db,
    entities::{batch_slot, cart, cart_item, delivery_address, product, shop},
    events::{self, EventSender},
    handlers::AppServices,
    notifications::{InMemoryNotificationService, Notifier},
    AppState,
};

/// Helper harness for spinning up application state backed by a
/// temp-file SQLite database with the real migrations applied.
pub struct TestApp {
    pub state: AppState,
    pub notifications: Arc<InMemoryNotificationService>,
    _event_task: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let db_path = tmp.path().join("campus_connect_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "redis://127.0.0.1:6379".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let notifications = Arc::new(InMemoryNotificationService::new());
        let notifier = Notifier::new(notifications.clone());

        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            notifier,
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            notifications,
            _event_task: event_task,
            _tmp: tmp,
        }
    }

    pub fn db(&self) -> &sea_orm::DatabaseConnection {
        &self.state.db
    }
}

pub async fn seed_shop(app: &TestApp, batching_enabled: bool) -> shop::Model {
    shop::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(Uuid::new_v4()),
        name: Set("Night Canteen".to_string()),
        is_accepting_orders: Set(true),
        batching_enabled: Set(batching_enabled),
        delivery_fee: Set(Decimal::new(1000, 2)),  // Rs 10.00
        platform_fee: Set(Decimal::new(500, 2)),   // Rs 5.00
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.db())
    .await
    .expect("failed to seed shop")
}

pub async fn seed_product(
    app: &TestApp,
    shop_id: Uuid,
    name: &str,
    price: Decimal,
    discount_percent: i32,
    stock: i32,
) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        shop_id: Set(shop_id),
        name: Set(name.to_string()),
        price: Set(price),
        discount_percent: Set(discount_percent),
        stock_quantity: Set(stock),
        is_available: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.db())
    .await
    .expect("failed to seed product")
}

pub async fn seed_address(app: &TestApp, user_id: Uuid) -> delivery_address::Model {
    delivery_address::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        label: Set("Hostel".to_string()),
        line_one: Set("Room 114, Block C".to_string()),
        line_two: Set(None),
        landmark: Set(Some("Near mess hall".to_string())),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.db())
    .await
    .expect("failed to seed address")
}

pub async fn seed_slot(app: &TestApp, shop_id: Uuid, minutes: i32) -> batch_slot::Model {
    batch_slot::ActiveModel {
        id: Set(Uuid::new_v4()),
        shop_id: Set(shop_id),
        cutoff_time_minutes: Set(minutes),
        label: Set(None),
        is_active: Set(true),
        sort_order: Set(0),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.db())
    .await
    .expect("failed to seed slot")
}

/// Seeds a cart for (user, shop) with the given (product, quantity) lines.
pub async fn seed_cart(
    app: &TestApp,
    user_id: Uuid,
    shop_id: Uuid,
    lines: &[(Uuid, i32)],
) -> cart::Model {
    let cart = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        shop_id: Set(shop_id),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(app.db())
    .await
    .expect("failed to seed cart");

    for (product_id, quantity) in lines {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            product_id: Set(*product_id),
            quantity: Set(*quantity),
            ..Default::default()
        }
        .insert(app.db())
        .await
        .expect("failed to seed cart item");
    }

    cart
}
