use crate::{
    auth::AuthUser,
    cart::Cart,
    entities::{order, order_item, product, OrderState, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
    realtime::{ChangeEvent, ChangeFeed, FeedTable},
    services::{
        cart::CartService,
        orders::{OrderDetails, OrderService},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of the transactional part of checkout
struct PlacedOrder {
    order: order::Model,
    line_count: usize,
    /// Products whose remaining stock fell under the low-stock threshold
    low_stock: Vec<(i32, i32)>,
}

/// Turns a buyer's cart into an order.
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    feed: ChangeFeed,
    carts: Arc<CartService>,
    orders: Arc<OrderService>,
    low_stock_threshold: i32,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        feed: ChangeFeed,
        carts: Arc<CartService>,
        orders: Arc<OrderService>,
        low_stock_threshold: i32,
    ) -> Self {
        Self {
            db,
            event_sender,
            feed,
            carts,
            orders,
            low_stock_threshold,
        }
    }

    /// Places an order for everything in the caller's cart.
    ///
    /// Prices are re-read from the catalog, not taken from the cart snapshot.
    /// The order row, its lines and every stock decrement commit together;
    /// any failure leaves no order and untouched stock.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn checkout(&self, user: &AuthUser) -> Result<OrderDetails, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;

        // Cart edits wait until this order is placed and the cart cleared.
        let _cart_guard = self.carts.lock(user.user_id).await;
        let cart = self.carts.get_cart(user).await?;
        if cart.is_empty() {
            return Err(ServiceError::checkout(ServiceError::ValidationError(
                "Cart is empty".to_string(),
            )));
        }

        let placed = match self.place_order(user.user_id, &cart).await {
            Ok(placed) => placed,
            Err(e) => {
                counter!("agrimarket.checkout_failures", 1);
                warn!(error = %e, "checkout failed");
                return Err(ServiceError::checkout(e));
            }
        };
        let order_id = placed.order.order_id;

        if let Err(e) = self.carts.clear_for(user.user_id).await {
            // The order stands; a stale cart only costs the buyer a manual clear.
            error!(order_id, error = %e, "failed to clear cart after checkout");
        }

        counter!("agrimarket.orders_placed", 1);
        info!(
            order_id,
            total = %placed.order.total_price,
            lines = placed.line_count,
            "order placed"
        );

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id,
                buyer_id: user.user_id,
                total_price: placed.order.total_price,
                line_count: placed.line_count,
            })
            .await;
        for (product_id, stock) in placed.low_stock {
            self.event_sender
                .send_or_log(Event::StockLow { product_id, stock })
                .await;
        }
        self.feed
            .publish(ChangeEvent::insert(FeedTable::Orders, &placed.order));

        self.orders.details(placed.order).await
    }

    async fn place_order(&self, buyer_id: Uuid, cart: &Cart) -> Result<PlacedOrder, ServiceError> {
        let txn = self.db.begin().await?;

        let mut priced = Vec::with_capacity(cart.line_count());
        for line in cart.lines() {
            let product_id = line.product.product_id;
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Cart line for product {} has quantity {}",
                    product_id, line.quantity
                )));
            }
            let current = product::Entity::find_by_id(product_id)
                .one(&txn)
                .await?
                .filter(product::Model::is_approved)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Product {} ({}) is no longer available",
                        product_id, line.product.name
                    ))
                })?;
            if line.quantity > current.stock {
                return Err(ServiceError::QuantityExceedsStock {
                    requested: line.quantity,
                    available: current.stock,
                });
            }
            priced.push((current, line.quantity));
        }

        let total: Decimal = priced
            .iter()
            .map(|(p, quantity)| p.price * Decimal::from(*quantity))
            .sum::<Decimal>()
            .round_dp(2);

        let order = order::ActiveModel {
            buyer_id: Set(buyer_id),
            total_price: Set(total),
            status_id: Set(OrderState::Pending.id()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut low_stock = Vec::new();
        for (current, quantity) in &priced {
            order_item::ActiveModel {
                order_id: Set(order.order_id),
                product_id: Set(current.product_id),
                quantity: Set(*quantity),
                price_per_unit: Set(current.price),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            decrement_stock(&txn, current, *quantity).await?;

            let remaining = current.stock - quantity;
            if remaining < self.low_stock_threshold {
                low_stock.push((current.product_id, remaining));
            }
        }

        txn.commit().await?;

        Ok(PlacedOrder {
            order,
            line_count: priced.len(),
            low_stock,
        })
    }
}

/// Takes `quantity` units if, and only if, that many are still in stock.
async fn decrement_stock(
    txn: &DatabaseTransaction,
    current: &product::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .filter(product::Column::ProductId.eq(current.product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        let available = product::Entity::find_by_id(current.product_id)
            .one(txn)
            .await?
            .map(|p| p.stock)
            .unwrap_or(0);
        return Err(ServiceError::QuantityExceedsStock {
            requested: quantity,
            available,
        });
    }
    Ok(())
}
