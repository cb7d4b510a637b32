use crate::entities::{activity_log, OrderState, ProductStatus, UserRole};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end for [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event; a closed channel only costs the activity entry.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("{}", e);
        }
    }
}

/// Domain events recorded in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user_id: Uuid,
        role: UserRole,
    },
    ProductCreated {
        product_id: i32,
        farmer_id: Uuid,
    },
    ProductUpdated {
        product_id: i32,
        farmer_id: Uuid,
    },
    ProductDeleted {
        product_id: i32,
        farmer_id: Uuid,
    },
    ProductStatusChanged {
        product_id: i32,
        admin_id: Uuid,
        old_status: ProductStatus,
        new_status: ProductStatus,
    },
    OrderPlaced {
        order_id: i32,
        buyer_id: Uuid,
        total_price: Decimal,
        line_count: usize,
    },
    OrderStatusChanged {
        order_id: i32,
        actor_id: Uuid,
        old_status: OrderState,
        new_status: OrderState,
        restocked: bool,
    },
    RatingSubmitted {
        product_id: i32,
        buyer_id: Uuid,
        rating: i32,
        with_review: bool,
    },
    StockLow {
        product_id: i32,
        stock: i32,
    },
}

impl Event {
    /// Stable action name stored in `activity_log.action`
    pub fn action(&self) -> &'static str {
        match self {
            Event::UserRegistered { .. } => "user_registered",
            Event::ProductCreated { .. } => "product_created",
            Event::ProductUpdated { .. } => "product_updated",
            Event::ProductDeleted { .. } => "product_deleted",
            Event::ProductStatusChanged { .. } => "product_status_changed",
            Event::OrderPlaced { .. } => "order_placed",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::RatingSubmitted { .. } => "rating_submitted",
            Event::StockLow { .. } => "stock_low",
        }
    }

    /// Profile that caused the event, if any
    pub fn actor(&self) -> Option<Uuid> {
        match self {
            Event::UserRegistered { user_id, .. } => Some(*user_id),
            Event::ProductCreated { farmer_id, .. }
            | Event::ProductUpdated { farmer_id, .. }
            | Event::ProductDeleted { farmer_id, .. } => Some(*farmer_id),
            Event::ProductStatusChanged { admin_id, .. } => Some(*admin_id),
            Event::OrderPlaced { buyer_id, .. } => Some(*buyer_id),
            Event::OrderStatusChanged { actor_id, .. } => Some(*actor_id),
            Event::RatingSubmitted { buyer_id, .. } => Some(*buyer_id),
            Event::StockLow { .. } => None,
        }
    }

    /// Human-readable summary stored in `activity_log.details`
    pub fn details(&self) -> String {
        match self {
            Event::UserRegistered { role, .. } => format!("Registered as {}", role),
            Event::ProductCreated { product_id, .. } => {
                format!("Created product #{} (awaiting approval)", product_id)
            }
            Event::ProductUpdated { product_id, .. } => format!("Updated product #{}", product_id),
            Event::ProductDeleted { product_id, .. } => format!("Deleted product #{}", product_id),
            Event::ProductStatusChanged {
                product_id,
                old_status,
                new_status,
                ..
            } => format!(
                "Product #{} moved from {} to {}",
                product_id, old_status, new_status
            ),
            Event::OrderPlaced {
                order_id,
                total_price,
                line_count,
                ..
            } => format!(
                "Placed order #{} with {} item(s) totalling {}",
                order_id, line_count, total_price
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
                restocked,
                ..
            } => {
                let mut text = format!(
                    "Order #{} moved from {} to {}",
                    order_id, old_status, new_status
                );
                if *restocked {
                    text.push_str("; stock returned");
                }
                text
            }
            Event::RatingSubmitted {
                product_id,
                rating,
                with_review,
                ..
            } => {
                if *with_review {
                    format!("Rated product #{} {}/5 with a review", product_id, rating)
                } else {
                    format!("Rated product #{} {}/5", product_id, rating)
                }
            }
            Event::StockLow { product_id, stock } => {
                format!("Product #{} is low on stock ({} left)", product_id, stock)
            }
        }
    }
}

/// Drains the event queue, writing one activity row per event.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, db: Arc<DatabaseConnection>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(action = event.action(), "Received event");

        if let Event::StockLow { product_id, stock } = &event {
            warn!(product_id, stock, "Product stock is running low");
        }

        if let Err(e) = record_activity(&db, &event).await {
            error!(
                action = event.action(),
                error = %e,
                "Failed to record activity"
            );
        }
    }

    info!("Event processing loop stopped");
}

async fn record_activity(db: &DatabaseConnection, event: &Event) -> Result<(), DbErr> {
    activity_log::ActiveModel {
        user_id: Set(event.actor()),
        action: Set(event.action().to_string()),
        details: Set(event.details()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}
