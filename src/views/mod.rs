//! Per-role dashboard state.
//!
//! [`view_for`] picks the dashboard a role lands on. [`OrderBoard`] is the
//! in-memory list of orders a dashboard shows, and [`LiveOrderBoard`] keeps
//! one patched from the change feed: every order change triggers a re-fetch
//! of the joined record, filtered to the viewer's own orders for buyers.

use crate::{
    auth::AuthUser,
    entities::UserRole,
    errors::ServiceError,
    realtime::{
        ChangeEvent, ChangeKind, FeedTable, RowFilter, Subscription, SubscriptionHandle,
        SubscriptionManager,
    },
    services::orders::{OrderDetails, OrderFilter, OrderService},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Dashboard a role is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardView {
    Farmer,
    Buyer,
    Admin,
}

impl DashboardView {
    pub fn title(&self) -> &'static str {
        match self {
            DashboardView::Farmer => "Farmer Dashboard",
            DashboardView::Buyer => "Marketplace",
            DashboardView::Admin => "Admin Dashboard",
        }
    }

    /// Panels shown on the dashboard, in display order
    pub fn sections(&self) -> &'static [&'static str] {
        match self {
            DashboardView::Farmer => &["my_products", "low_stock", "orders", "sales"],
            DashboardView::Buyer => &["products", "cart", "my_orders"],
            DashboardView::Admin => {
                &["users", "product_approvals", "orders", "revenue", "activity"]
            }
        }
    }
}

pub fn view_for(role: UserRole) -> DashboardView {
    match role {
        UserRole::Farmer => DashboardView::Farmer,
        UserRole::Buyer => DashboardView::Buyer,
        UserRole::Admin => DashboardView::Admin,
    }
}

/// Orders keyed by id
#[derive(Debug, Clone, Default)]
pub struct OrderBoard {
    orders: BTreeMap<i32, OrderDetails>,
}

impl OrderBoard {
    pub fn new(orders: impl IntoIterator<Item = OrderDetails>) -> Self {
        Self {
            orders: orders.into_iter().map(|o| (o.order_id, o)).collect(),
        }
    }

    pub fn upsert(&mut self, order: OrderDetails) {
        self.orders.insert(order.order_id, order);
    }

    pub fn remove(&mut self, order_id: i32) -> Option<OrderDetails> {
        self.orders.remove(&order_id)
    }

    pub fn get(&self, order_id: i32) -> Option<&OrderDetails> {
        self.orders.get(&order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Newest first
    pub fn snapshot(&self) -> Vec<OrderDetails> {
        self.orders.values().rev().cloned().collect()
    }
}

/// Subscription a viewer's order board listens on
pub fn order_subscription(viewer: &AuthUser) -> Subscription {
    let subscription = Subscription::new(FeedTable::Orders);
    if viewer.role == UserRole::Buyer {
        subscription.filter(RowFilter::eq("buyer_id", viewer.user_id))
    } else {
        subscription
    }
}

/// Re-fetches the order a change refers to, as the viewer sees it.
///
/// `Ok(None)` means the order is gone or no longer visible.
pub async fn refetch_order(
    orders: &OrderService,
    viewer: &AuthUser,
    change: &ChangeEvent,
) -> Result<Option<OrderDetails>, ServiceError> {
    let Some(order_id) = change.int_column("order_id").and_then(|id| i32::try_from(id).ok()) else {
        return Ok(None);
    };
    if change.kind == ChangeKind::Delete {
        return Ok(None);
    }
    match orders.get_order(viewer, order_id).await {
        Ok(details) => Ok(Some(details)),
        Err(ServiceError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// An [`OrderBoard`] kept current by the change feed until dropped.
pub struct LiveOrderBoard {
    board: Arc<RwLock<OrderBoard>>,
    _handle: SubscriptionHandle,
}

impl LiveOrderBoard {
    pub async fn open(
        orders: Arc<OrderService>,
        subscriptions: &SubscriptionManager,
        viewer: AuthUser,
        page_size: u64,
    ) -> Result<Self, ServiceError> {
        let board = Arc::new(RwLock::new(OrderBoard::default()));

        // Subscribe before the initial load so no change slips between the two.
        let handle = {
            let board = board.clone();
            let orders = orders.clone();
            let viewer = viewer.clone();
            subscriptions.subscribe(order_subscription(&viewer), move |change| {
                let board = board.clone();
                let orders = orders.clone();
                let viewer = viewer.clone();
                async move {
                    let Some(order_id) = change
                        .int_column("order_id")
                        .and_then(|id| i32::try_from(id).ok())
                    else {
                        return;
                    };
                    match refetch_order(&orders, &viewer, &change).await {
                        Ok(Some(details)) => {
                            debug!(order_id, status = %details.status, "order board patched");
                            board.write().await.upsert(details);
                        }
                        Ok(None) => {
                            board.write().await.remove(order_id);
                        }
                        Err(e) => warn!(order_id, error = %e, "order board refresh failed"),
                    }
                }
            })
        };

        let (initial, _) = orders
            .list_orders(
                &viewer,
                OrderFilter {
                    status_id: None,
                    page: 1,
                    per_page: page_size,
                },
            )
            .await?;
        {
            let mut guard = board.write().await;
            for order in initial {
                guard.upsert(order);
            }
        }

        Ok(Self {
            board,
            _handle: handle,
        })
    }

    pub async fn snapshot(&self) -> Vec<OrderDetails> {
        self.board.read().await.snapshot()
    }

    pub async fn get(&self, order_id: i32) -> Option<OrderDetails> {
        self.board.read().await.get(order_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.board.read().await.len()
    }
}
