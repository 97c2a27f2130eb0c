use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        batch_slot::{self, Entity as BatchSlotEntity},
        cart::{self, Entity as CartEntity},
        cart_item::{self, Entity as CartItemEntity},
        delivery_address::Entity as DeliveryAddressEntity,
        id_counter::{self, Entity as IdCounterEntity},
        order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as ProductEntity},
        shop::Entity as ShopEntity,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{NotificationPayload, NotificationType, Notifier},
    services::{batches::BatchService, cutoff},
};

/// Counter row backing the order display-id sequence.
const ORDER_DISPLAY_ID_COUNTER: &str = "order_display_id";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderFromCartRequest {
    pub user_id: Uuid,
    pub shop_id: Uuid,
    #[validate(length(min = 1, max = 20, message = "Payment method is required"))]
    pub payment_method: String,
    pub delivery_address_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub display_id: String,
    pub user_id: Uuid,
    pub shop_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub delivery_address_id: Uuid,
    pub total_price: Decimal,
    pub actual_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service handling order admission: stock validation and reservation, cart
/// conversion, batch attachment, and display-id allocation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    notifier: Notifier,
    timezone: Tz,
    display_id_prefix: String,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        notifier: Notifier,
        timezone: Tz,
        display_id_prefix: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            notifier,
            timezone,
            display_id_prefix,
        }
    }

    /// Converts the caller's cart for a shop into an order.
    ///
    /// Runs as one transaction: order + item snapshots, guarded stock
    /// decrements, cart cleanup, batch attachment, and display-id allocation
    /// all commit or roll back together. The owner notification fires after
    /// commit and never fails the operation.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, shop_id = %request.shop_id))]
    pub async fn create_order_from_cart(
        &self,
        request: CreateOrderFromCartRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let cart = CartEntity::find()
            .filter(cart::Column::UserId.eq(request.user_id))
            .filter(cart::Column::ShopId.eq(request.shop_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found for this shop".to_string()))?;

        let lines = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::NotFound(
                "Cart is empty for this shop".to_string(),
            ));
        }

        let shop = ShopEntity::find_by_id(request.shop_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Shop {} not found", request.shop_id))
            })?;
        if !shop.is_accepting_orders {
            return Err(ServiceError::ValidationError(
                "Shop is not accepting orders right now".to_string(),
            ));
        }

        let address = DeliveryAddressEntity::find_by_id(request.delivery_address_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Delivery address not found".to_string()))?;
        if address.user_id != request.user_id {
            return Err(ServiceError::Unauthorized(
                "Delivery address does not belong to this user".to_string(),
            ));
        }

        // Validate every line and price it in integer paise before touching
        // any stock counter.
        let mut priced_lines = Vec::with_capacity(lines.len());
        let mut items_total_paise: i64 = 0;
        for line in &lines {
            let product = ProductEntity::find_by_id(line.product_id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;

            if product.shop_id != request.shop_id {
                return Err(ServiceError::ValidationError(format!(
                    "Product '{}' does not belong to this shop",
                    product.name
                )));
            }
            if !product.is_available {
                return Err(ServiceError::ValidationError(format!(
                    "Product '{}' is currently unavailable",
                    product.name
                )));
            }
            if product.stock_quantity < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for '{}': requested {}, available {}",
                    product.name, line.quantity, product.stock_quantity
                )));
            }

            let unit_paise = rupees_to_paise(product.price)?;
            let discounted_paise = discounted_unit_paise(unit_paise, product.discount_percent);
            let line_total_paise = discounted_paise * line.quantity as i64;
            items_total_paise += line_total_paise;

            priced_lines.push(PricedLine {
                product,
                quantity: line.quantity,
                unit_paise: discounted_paise,
                total_paise: line_total_paise,
            });
        }

        // Reserve inventory with guarded conditional decrements; a race that
        // drained stock since the read above fails the whole admission.
        let mut depleted = Vec::new();
        for line in &priced_lines {
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product.id))
                .filter(product::Column::StockQuantity.gte(line.quantity))
                .exec(&txn)
                .await?;

            if result.rows_affected == 0 {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for '{}': requested {}",
                    line.product.name, line.quantity
                )));
            }

            if line.product.stock_quantity - line.quantity <= 0 {
                depleted.push(line.product.clone());
            }
        }

        let delivery_fee_paise = rupees_to_paise(shop.delivery_fee)?;
        let total_paise = items_total_paise + delivery_fee_paise;
        let total_price = Decimal::new(total_paise, 2);

        // Attach to the shop's open batch for the next cutoff window,
        // creating it lazily. Shops without batching stay unbatched.
        let mut opened_batch = None;
        let batch_id = if shop.batching_enabled {
            let slots = BatchSlotEntity::find()
                .filter(batch_slot::Column::ShopId.eq(request.shop_id))
                .filter(batch_slot::Column::IsActive.eq(true))
                .all(&txn)
                .await?;
            let minutes: Vec<i32> = slots.iter().map(|s| s.cutoff_time_minutes).collect();

            match cutoff::compute_next_cutoff(now, self.timezone, &minutes) {
                Some(cutoff_time) => {
                    let (batch, created) =
                        BatchService::find_or_create_open_batch(&txn, request.shop_id, cutoff_time)
                            .await?;
                    if created {
                        opened_batch = Some(batch.id);
                    }
                    Some(batch.id)
                }
                None => None,
            }
        } else {
            None
        };

        let display_id = next_display_id(&txn, &self.display_id_prefix).await?;

        let order_id = Uuid::new_v4();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            display_id: Set(display_id.clone()),
            user_id: Set(request.user_id),
            shop_id: Set(request.shop_id),
            batch_id: Set(batch_id),
            order_status: Set(OrderStatus::New),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(request.payment_method.clone()),
            delivery_address_id: Set(request.delivery_address_id),
            delivery_otp: Set(None),
            total_price: Set(total_price),
            assigned_to: Set(None),
            actual_delivery_time: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut item_models = Vec::with_capacity(priced_lines.len());
        for line in &priced_lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                product_name: Set(line.product.name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(Decimal::new(line.unit_paise, 2)),
                total_price: Set(Decimal::new(line.total_paise, 2)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            item_models.push(item);
        }

        CartItemEntity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, display_id = %display_id, "Order created");

        if let Some(batch_id) = opened_batch {
            if let Err(e) = self
                .event_sender
                .send(Event::BatchOpened {
                    batch_id,
                    shop_id: request.shop_id,
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send batch opened event");
            }
        }
        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order created event");
        }
        for line in &priced_lines {
            if let Err(e) = self
                .event_sender
                .send(Event::StockReserved {
                    product_id: line.product.id,
                    quantity: line.quantity,
                })
                .await
            {
                warn!(error = %e, product_id = %line.product.id, "Failed to send stock reserved event");
            }
        }

        self.notifier
            .notify_best_effort(
                shop.owner_id,
                NotificationPayload {
                    title: "New order".to_string(),
                    message: format!("Order {} placed for Rs {}", display_id, total_price),
                    action_url: Some(format!("/vendor/orders/{}", order_id)),
                    notification_type: NotificationType::OrderUpdate,
                },
            )
            .await;

        for product in depleted {
            if let Err(e) = self
                .event_sender
                .send(Event::StockDepleted {
                    product_id: product.id,
                    shop_id: product.shop_id,
                })
                .await
            {
                warn!(error = %e, product_id = %product.id, "Failed to send stock depleted event");
            }
            self.notifier
                .notify_best_effort(
                    shop.owner_id,
                    NotificationPayload {
                        title: "Out of stock".to_string(),
                        message: format!("'{}' just sold out", product.name),
                        action_url: Some(format!("/vendor/products/{}", product.id)),
                        notification_type: NotificationType::InventoryAlert,
                    },
                )
                .await;
        }

        Ok(order_to_response(order_model, item_models))
    }

    /// Retrieves an order with its item snapshots
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        Ok(order_to_response(order, items))
    }

    /// Lists a user's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        self.list_orders(order::Column::UserId.eq(user_id), page, per_page)
            .await
    }

    /// Lists a shop's orders, newest first
    #[instrument(skip(self))]
    pub async fn list_orders_for_shop(
        &self,
        shop_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        self.list_orders(order::Column::ShopId.eq(shop_id), page, per_page)
            .await
    }

    async fn list_orders(
        &self,
        filter: sea_orm::sea_query::SimpleExpr,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = OrderEntity::find()
            .filter(filter)
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let responses = orders
            .into_iter()
            .map(|o| order_to_response(o, Vec::new()))
            .collect();

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }
}

struct PricedLine {
    product: product::Model,
    quantity: i32,
    unit_paise: i64,
    total_paise: i64,
}

/// Converts a decimal rupee amount to integer paise, the unit all checkout
/// arithmetic happens in.
fn rupees_to_paise(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("Amount out of range: {}", amount)))
}

/// Applies a whole-percent discount in integer arithmetic.
fn discounted_unit_paise(unit_paise: i64, discount_percent: i32) -> i64 {
    let discount = i64::from(discount_percent.clamp(0, 100));
    unit_paise * (100 - discount) / 100
}

/// Allocates the next display id inside the caller's transaction. The first
/// allocation ever seeds the counter row; a seeding race falls back to the
/// increment path.
async fn next_display_id<C: ConnectionTrait>(
    conn: &C,
    prefix: &str,
) -> Result<String, ServiceError> {
    let bump = || {
        IdCounterEntity::update_many()
            .col_expr(
                id_counter::Column::Value,
                Expr::col(id_counter::Column::Value).add(1),
            )
            .filter(id_counter::Column::Name.eq(ORDER_DISPLAY_ID_COUNTER))
    };

    let bumped = bump().exec(conn).await?;
    if bumped.rows_affected == 0 {
        let seed = id_counter::ActiveModel {
            name: Set(ORDER_DISPLAY_ID_COUNTER.to_string()),
            value: Set(1),
        };
        match seed.insert(conn).await {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                bump().exec(conn).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let counter = IdCounterEntity::find_by_id(ORDER_DISPLAY_ID_COUNTER)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::InternalError("Display id counter missing after increment".to_string())
        })?;

    Ok(format!("{}{:06}", prefix, counter.value))
}

fn order_to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        display_id: order.display_id,
        user_id: order.user_id,
        shop_id: order.shop_id,
        batch_id: order.batch_id,
        order_status: order.order_status,
        payment_status: order.payment_status,
        payment_method: order.payment_method,
        delivery_address_id: order.delivery_address_id,
        total_price: order.total_price,
        actual_delivery_time: order.actual_delivery_time,
        created_at: order.created_at,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                product_id: i.product_id,
                product_name: i.product_name,
                quantity: i.quantity,
                unit_price: i.unit_price,
                total_price: i.total_price,
            })
            .collect(),
    }
}
