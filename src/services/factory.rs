use std::sync::Arc;

use crate::{
    cart::{CartStore, FileCartStore, MemoryCartStore},
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    realtime::ChangeFeed,
    services::{
        activity::ActivityService, cart::CartService, catalog::CatalogService,
        checkout::CheckoutService, dashboard::DashboardService, orders::OrderService,
        ratings::RatingService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    feed: ChangeFeed,
    cart_store: Arc<dyn CartStore>,
    low_stock_threshold: i32,
    recent_orders_limit: u64,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        feed: ChangeFeed,
        cart_store: Arc<dyn CartStore>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            feed,
            cart_store,
            low_stock_threshold: 10,
            recent_orders_limit: 5,
        }
    }

    /// Builds a factory with the cart backend and thresholds from configuration.
    pub fn from_config(
        config: &AppConfig,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        feed: ChangeFeed,
    ) -> Self {
        let cart_store: Arc<dyn CartStore> = if config.cart.is_file_backed() {
            Arc::new(FileCartStore::new(config.cart.dir.clone()))
        } else {
            Arc::new(MemoryCartStore::new())
        };

        Self {
            low_stock_threshold: config.low_stock_threshold,
            recent_orders_limit: config.recent_orders_limit,
            ..Self::new(db_pool, event_sender, feed, cart_store)
        }
    }

    pub fn catalog_service(&self) -> CatalogService {
        CatalogService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.feed.clone(),
        )
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.db_pool.clone(), self.cart_store.clone())
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.feed.clone(),
        )
    }

    pub fn rating_service(&self) -> RatingService {
        RatingService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.feed.clone(),
        )
    }

    pub fn activity_service(&self) -> ActivityService {
        ActivityService::new(self.db_pool.clone())
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    /// Gets a reference to the event sender
    pub fn event_sender(&self) -> &Arc<EventSender> {
        &self.event_sender
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub ratings: Arc<RatingService>,
    pub dashboard: Arc<DashboardService>,
    pub activity: Arc<ActivityService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        let carts = Arc::new(factory.cart_service());
        let orders = Arc::new(factory.order_service());

        let checkout = CheckoutService::new(
            factory.db_pool.clone(),
            factory.event_sender.clone(),
            factory.feed.clone(),
            carts.clone(),
            orders.clone(),
            factory.low_stock_threshold,
        );
        let dashboard = DashboardService::new(
            factory.db_pool.clone(),
            orders.clone(),
            factory.low_stock_threshold,
            factory.recent_orders_limit,
        );

        Self {
            catalog: Arc::new(factory.catalog_service()),
            carts,
            checkout: Arc::new(checkout),
            orders,
            ratings: Arc::new(factory.rating_service()),
            dashboard: Arc::new(dashboard),
            activity: Arc::new(factory.activity_service()),
        }
    }
}
