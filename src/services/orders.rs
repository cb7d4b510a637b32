use crate::{
    auth::AuthUser,
    entities::{order, order_item, product, profile, OrderState, StatusChange, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
    realtime::{ChangeEvent, ChangeFeed, FeedTable},
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuyerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub item_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub farmer_id: Option<Uuid>,
    pub quantity: i32,
    pub price_per_unit: Decimal,
    pub line_total: Decimal,
}

/// An order joined with its status name, buyer and line items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderDetails {
    pub order_id: i32,
    pub buyer: Option<BuyerSummary>,
    pub status_id: i32,
    pub status: String,
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusOutcome {
    Updated,
    AlreadyDelivered,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub outcome: StatusOutcome,
    pub restocked: bool,
    pub order: OrderDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status_id: Option<i32>,
    pub page: u64,
    pub per_page: u64,
}

pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    feed: ChangeFeed,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        feed: ChangeFeed,
    ) -> Self {
        Self {
            db,
            event_sender,
            feed,
        }
    }

    /// Orders the caller may see: buyers their own, farmers those holding
    /// their products, admins everything.
    #[instrument(skip(self, user), fields(user_id = %user.user_id, role = %user.role))]
    pub async fn list_orders(
        &self,
        user: &AuthUser,
        filter: OrderFilter,
    ) -> Result<(Vec<OrderDetails>, u64), ServiceError> {
        let mut query = order::Entity::find();

        match user.role {
            UserRole::Admin => {}
            UserRole::Buyer => query = query.filter(order::Column::BuyerId.eq(user.user_id)),
            UserRole::Farmer => {
                let ids = farmer_order_ids(&*self.db, user.user_id).await?;
                if ids.is_empty() {
                    return Ok((Vec::new(), 0));
                }
                query = query.filter(order::Column::OrderId.is_in(ids));
            }
        }

        if let Some(status_id) = filter.status_id {
            if OrderState::from_id(status_id).is_none() {
                return Err(ServiceError::InvalidStatus(format!(
                    "Unknown order status {}",
                    status_id
                )));
            }
            query = query.filter(order::Column::StatusId.eq(status_id));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderId)
            .paginate(&*self.db, filter.per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(filter.page.max(1) - 1).await?;

        Ok((self.load_details(orders).await?, total))
    }

    /// One order with its joined representation; inaccessible orders read as missing.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn get_order(
        &self,
        user: &AuthUser,
        order_id: i32,
    ) -> Result<OrderDetails, ServiceError> {
        let found = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| not_found(order_id))?;

        let visible = match user.role {
            UserRole::Admin => true,
            UserRole::Buyer => found.buyer_id == user.user_id,
            UserRole::Farmer => farmer_has_lines(&*self.db, order_id, user.user_id).await?,
        };
        if !visible {
            return Err(not_found(order_id));
        }

        self.details(found).await
    }

    /// Moves an order to `new_status_id`.
    ///
    /// Cancelling returns every line's quantity to stock inside the same
    /// transaction. The status write is conditional on the status read, so
    /// two racing cancellations restock only once.
    #[instrument(skip(self, user), fields(user_id = %user.user_id, role = %user.role))]
    pub async fn set_order_status(
        &self,
        user: &AuthUser,
        order_id: i32,
        new_status_id: i32,
    ) -> Result<StatusUpdate, ServiceError> {
        if user.is_buyer() {
            return Err(ServiceError::AuthorizationError(
                "Buyers cannot change order status".to_string(),
            ));
        }
        let next = OrderState::from_id(new_status_id).ok_or_else(|| {
            ServiceError::InvalidStatus(format!("Unknown order status {}", new_status_id))
        })?;

        let txn = self.db.begin().await?;

        let existing = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| not_found(order_id))?;

        if user.is_farmer() && !farmer_has_lines(&txn, order_id, user.user_id).await? {
            return Err(ServiceError::AuthorizationError(format!(
                "Order {} contains none of your products",
                order_id
            )));
        }

        let current = OrderState::from_id(existing.status_id).ok_or_else(|| {
            error!(order_id, status_id = existing.status_id, "order has unknown status");
            ServiceError::InternalError(format!("Order {} has an unknown status", order_id))
        })?;

        let restock = match current.change_to(next) {
            StatusChange::AlreadyDelivered => {
                txn.rollback().await?;
                info!(order_id, "order already delivered");
                return self.unchanged(existing, StatusOutcome::AlreadyDelivered).await;
            }
            StatusChange::Unchanged => {
                txn.rollback().await?;
                return self.unchanged(existing, StatusOutcome::Unchanged).await;
            }
            StatusChange::Rejected => {
                warn!(order_id, from = %current, to = %next, "rejected order status change");
                return Err(ServiceError::InvalidTransition(format!(
                    "Order {} cannot move from {} to {}",
                    order_id, current, next
                )));
            }
            StatusChange::Apply { restock } => restock,
        };

        let now = Utc::now();
        let written = order::Entity::update_many()
            .col_expr(order::Column::StatusId, Expr::value(next.id()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(order::Column::OrderId.eq(order_id))
            .filter(order::Column::StatusId.eq(current.id()))
            .exec(&txn)
            .await?;
        if written.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} changed while updating; retry with its current status",
                order_id
            )));
        }

        if restock {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(order_id))
                .all(&txn)
                .await?;
            for item in &items {
                product::Entity::update_many()
                    .col_expr(
                        product::Column::Stock,
                        Expr::col(product::Column::Stock).add(item.quantity),
                    )
                    .filter(product::Column::ProductId.eq(item.product_id))
                    .exec(&txn)
                    .await?;
            }
        }

        txn.commit().await?;

        counter!("agrimarket.order_status_changes", 1);
        info!(order_id, from = %current, to = %next, restock, "order status changed");

        let updated = order::Model {
            status_id: next.id(),
            updated_at: Some(now),
            ..existing.clone()
        };

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                actor_id: user.user_id,
                old_status: current,
                new_status: next,
                restocked: restock,
            })
            .await;
        self.feed
            .publish(ChangeEvent::update(FeedTable::Orders, &existing, &updated));

        Ok(StatusUpdate {
            outcome: StatusOutcome::Updated,
            restocked: restock,
            order: self.details(updated).await?,
        })
    }

    async fn unchanged(
        &self,
        order: order::Model,
        outcome: StatusOutcome,
    ) -> Result<StatusUpdate, ServiceError> {
        Ok(StatusUpdate {
            outcome,
            restocked: false,
            order: self.details(order).await?,
        })
    }

    /// Joined representation of a single order.
    pub async fn details(&self, order: order::Model) -> Result<OrderDetails, ServiceError> {
        let order_id = order.order_id;
        self.load_details(vec![order])
            .await?
            .pop()
            .ok_or_else(|| not_found(order_id))
    }

    /// Joins status names, buyers and line items onto a page of orders.
    pub async fn load_details(
        &self,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;

        let order_ids: Vec<i32> = orders.iter().map(|o| o.order_id).collect();
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::ItemId)
            .all(db)
            .await?;

        let product_ids: HashSet<i32> = items.iter().map(|i| i.product_id).collect();
        let products: HashMap<i32, product::Model> = if product_ids.is_empty() {
            HashMap::new()
        } else {
            product::Entity::find()
                .filter(product::Column::ProductId.is_in(product_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|p| (p.product_id, p))
                .collect()
        };

        let buyer_ids: HashSet<Uuid> = orders.iter().map(|o| o.buyer_id).collect();
        let buyers: HashMap<Uuid, BuyerSummary> = profile::Entity::find()
            .filter(profile::Column::Id.is_in(buyer_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| {
                (
                    p.id,
                    BuyerSummary {
                        id: p.id,
                        name: p.name,
                        email: p.email,
                    },
                )
            })
            .collect();

        let mut lines: HashMap<i32, Vec<OrderLine>> = HashMap::new();
        for item in items {
            let product = products.get(&item.product_id);
            lines.entry(item.order_id).or_default().push(OrderLine {
                item_id: item.item_id,
                product_id: item.product_id,
                product_name: product
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| format!("Product {}", item.product_id)),
                farmer_id: product.map(|p| p.farmer_id),
                quantity: item.quantity,
                price_per_unit: item.price_per_unit,
                line_total: item.line_total().round_dp(2),
            });
        }

        Ok(orders
            .into_iter()
            .map(|o| OrderDetails {
                order_id: o.order_id,
                buyer: buyers.get(&o.buyer_id).cloned(),
                status_id: o.status_id,
                status: OrderState::from_id(o.status_id)
                    .map(|s| s.name().to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                total_price: o.total_price,
                created_at: o.created_at,
                updated_at: o.updated_at,
                items: lines.remove(&o.order_id).unwrap_or_default(),
            })
            .collect())
    }
}

/// Ids of orders that contain at least one product owned by `farmer_id`.
pub(crate) async fn farmer_order_ids<C: ConnectionTrait>(
    db: &C,
    farmer_id: Uuid,
) -> Result<Vec<i32>, ServiceError> {
    let product_ids = farmer_product_ids(db, farmer_id).await?;
    if product_ids.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = order_item::Entity::find()
        .select_only()
        .column(order_item::Column::OrderId)
        .filter(order_item::Column::ProductId.is_in(product_ids))
        .distinct()
        .into_tuple()
        .all(db)
        .await?;
    Ok(ids)
}

async fn farmer_product_ids<C: ConnectionTrait>(
    db: &C,
    farmer_id: Uuid,
) -> Result<Vec<i32>, ServiceError> {
    Ok(product::Entity::find()
        .select_only()
        .column(product::Column::ProductId)
        .filter(product::Column::FarmerId.eq(farmer_id))
        .into_tuple()
        .all(db)
        .await?)
}

async fn farmer_has_lines<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    farmer_id: Uuid,
) -> Result<bool, ServiceError> {
    let product_ids = farmer_product_ids(db, farmer_id).await?;
    if product_ids.is_empty() {
        return Ok(false);
    }
    let count = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .filter(order_item::Column::ProductId.is_in(product_ids))
        .count(db)
        .await?;
    Ok(count > 0)
}

fn not_found(order_id: i32) -> ServiceError {
    ServiceError::NotFound(format!("Order {}", order_id))
}
