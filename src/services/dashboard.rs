use crate::{
    auth::AuthUser,
    entities::{
        order, order_item, product, profile, OrderState, ProductStatus, ProfileView, UserRole,
    },
    errors::ServiceError,
    services::orders::{farmer_order_ids, OrderDetails, OrderService},
};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub farmers: u64,
    pub buyers: u64,
    pub total_products: u64,
    pub pending_products: u64,
    pub low_stock_products: u64,
    pub total_orders: u64,
    /// Sum of order totals, cancelled orders excluded
    pub revenue: Decimal,
    pub recent_orders: Vec<OrderDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerStats {
    pub product_count: u64,
    pub pending_products: u64,
    pub approved_products: u64,
    pub low_stock: Vec<product::Model>,
    pub order_count: u64,
    /// Value of this farmer's lines in orders that were not cancelled
    pub sales: Decimal,
    pub recent_orders: Vec<OrderDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerStats {
    pub available_products: u64,
    pub order_count: u64,
    pub open_orders: u64,
    pub total_spent: Decimal,
    pub recent_orders: Vec<OrderDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum DashboardStats {
    Admin(AdminStats),
    Farmer(FarmerStats),
    Buyer(BuyerStats),
}

#[derive(Debug, FromQueryResult)]
struct Revenue {
    revenue: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub page: u64,
    pub per_page: u64,
}

pub struct DashboardService {
    db: Arc<DatabaseConnection>,
    orders: Arc<OrderService>,
    low_stock_threshold: i32,
    recent_orders_limit: u64,
}

impl DashboardService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: Arc<OrderService>,
        low_stock_threshold: i32,
        recent_orders_limit: u64,
    ) -> Self {
        Self {
            db,
            orders,
            low_stock_threshold,
            recent_orders_limit,
        }
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id, role = %user.role))]
    pub async fn stats_for(&self, user: &AuthUser) -> Result<DashboardStats, ServiceError> {
        Ok(match user.role {
            UserRole::Admin => DashboardStats::Admin(self.admin_stats().await?),
            UserRole::Farmer => DashboardStats::Farmer(self.farmer_stats(user.user_id).await?),
            UserRole::Buyer => DashboardStats::Buyer(self.buyer_stats(user.user_id).await?),
        })
    }

    async fn admin_stats(&self) -> Result<AdminStats, ServiceError> {
        let db = &*self.db;

        let total_users = profile::Entity::find().count(db).await?;
        let farmers = profile::Entity::find()
            .filter(profile::Column::Role.eq(UserRole::Farmer))
            .count(db)
            .await?;
        let buyers = profile::Entity::find()
            .filter(profile::Column::Role.eq(UserRole::Buyer))
            .count(db)
            .await?;

        let total_products = product::Entity::find().count(db).await?;
        let pending_products = product::Entity::find()
            .filter(product::Column::Status.eq(ProductStatus::Pending))
            .count(db)
            .await?;
        let low_stock_products = product::Entity::find()
            .filter(product::Column::Stock.lt(self.low_stock_threshold))
            .count(db)
            .await?;

        let total_orders = order::Entity::find().count(db).await?;
        let revenue = order::Entity::find()
            .select_only()
            .column_as(order::Column::TotalPrice.sum(), "revenue")
            .filter(order::Column::StatusId.ne(OrderState::Cancelled.id()))
            .into_model::<Revenue>()
            .one(db)
            .await?
            .and_then(|r| r.revenue)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);

        let recent = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderId)
            .limit(self.recent_orders_limit)
            .all(db)
            .await?;

        Ok(AdminStats {
            total_users,
            farmers,
            buyers,
            total_products,
            pending_products,
            low_stock_products,
            total_orders,
            revenue,
            recent_orders: self.orders.load_details(recent).await?,
        })
    }

    async fn farmer_stats(&self, farmer_id: Uuid) -> Result<FarmerStats, ServiceError> {
        let db = &*self.db;
        let own = || product::Entity::find().filter(product::Column::FarmerId.eq(farmer_id));

        let product_count = own().count(db).await?;
        let pending_products = own()
            .filter(product::Column::Status.eq(ProductStatus::Pending))
            .count(db)
            .await?;
        let approved_products = own()
            .filter(product::Column::Status.eq(ProductStatus::Approved))
            .count(db)
            .await?;
        let low_stock = own()
            .filter(product::Column::Stock.lt(self.low_stock_threshold))
            .order_by_asc(product::Column::Stock)
            .all(db)
            .await?;

        let order_ids = farmer_order_ids(db, farmer_id).await?;
        let (order_count, sales, recent) = if order_ids.is_empty() {
            (0, Decimal::ZERO, Vec::new())
        } else {
            let live_orders: Vec<i32> = order::Entity::find()
                .select_only()
                .column(order::Column::OrderId)
                .filter(order::Column::OrderId.is_in(order_ids.clone()))
                .filter(order::Column::StatusId.ne(OrderState::Cancelled.id()))
                .into_tuple()
                .all(db)
                .await?;
            let own_ids: Vec<i32> = own()
                .select_only()
                .column(product::Column::ProductId)
                .into_tuple()
                .all(db)
                .await?;
            let sales = if live_orders.is_empty() {
                Decimal::ZERO
            } else {
                order_item::Entity::find()
                    .filter(order_item::Column::OrderId.is_in(live_orders))
                    .filter(order_item::Column::ProductId.is_in(own_ids))
                    .all(db)
                    .await?
                    .iter()
                    .map(order_item::Model::line_total)
                    .sum::<Decimal>()
                    .round_dp(2)
            };

            let recent = order::Entity::find()
                .filter(order::Column::OrderId.is_in(order_ids.clone()))
                .order_by_desc(order::Column::CreatedAt)
                .order_by_desc(order::Column::OrderId)
                .limit(self.recent_orders_limit)
                .all(db)
                .await?;
            (order_ids.len() as u64, sales, recent)
        };

        Ok(FarmerStats {
            product_count,
            pending_products,
            approved_products,
            low_stock,
            order_count,
            sales,
            recent_orders: self.orders.load_details(recent).await?,
        })
    }

    async fn buyer_stats(&self, buyer_id: Uuid) -> Result<BuyerStats, ServiceError> {
        let db = &*self.db;
        let mine = || order::Entity::find().filter(order::Column::BuyerId.eq(buyer_id));

        let available_products = product::Entity::find()
            .filter(product::Column::Status.eq(ProductStatus::Approved))
            .filter(product::Column::Stock.gt(0))
            .count(db)
            .await?;
        let order_count = mine().count(db).await?;
        let open_orders = mine()
            .filter(order::Column::StatusId.is_in([
                OrderState::Pending.id(),
                OrderState::Confirmed.id(),
                OrderState::Shipped.id(),
            ]))
            .count(db)
            .await?;
        let total_spent = mine()
            .select_only()
            .column_as(order::Column::TotalPrice.sum(), "revenue")
            .filter(order::Column::StatusId.ne(OrderState::Cancelled.id()))
            .into_model::<Revenue>()
            .one(db)
            .await?
            .and_then(|r| r.revenue)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);

        let recent = mine()
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderId)
            .limit(self.recent_orders_limit)
            .all(db)
            .await?;

        Ok(BuyerStats {
            available_products,
            order_count,
            open_orders,
            total_spent,
            recent_orders: self.orders.load_details(recent).await?,
        })
    }

    /// Registered profiles, newest first. Admin only.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn list_users(
        &self,
        user: &AuthUser,
        filter: UserFilter,
    ) -> Result<(Vec<ProfileView>, u64), ServiceError> {
        user.require_any(&[UserRole::Admin])?;

        let mut query = profile::Entity::find();
        if let Some(role) = filter.role {
            query = query.filter(profile::Column::Role.eq(role));
        }
        let paginator = query
            .order_by_desc(profile::Column::CreatedAt)
            .paginate(&*self.db, filter.per_page.max(1));
        let total = paginator.num_items().await?;
        let users = paginator
            .fetch_page(filter.page.max(1) - 1)
            .await?
            .into_iter()
            .map(ProfileView::from)
            .collect();
        Ok((users, total))
    }
}
