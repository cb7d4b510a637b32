use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lookup table seeded by the migrator with the five fixed order states.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub status_id: i32,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle. Stored as `orders.status_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Pending = 1,
    Confirmed = 2,
    Shipped = 3,
    Delivered = 4,
    Cancelled = 5,
}

/// Outcome of asking an order to move to a new state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Row must be updated; `restock` is set for cancellations.
    Apply { restock: bool },
    /// Delivered asked to become Delivered again.
    AlreadyDelivered,
    /// Any other same-state request.
    Unchanged,
    /// Move is not allowed from the current state.
    Rejected,
}

impl OrderState {
    pub const ALL: [OrderState; 5] = [
        OrderState::Pending,
        OrderState::Confirmed,
        OrderState::Shipped,
        OrderState::Delivered,
        OrderState::Cancelled,
    ];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.id() == id)
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            OrderState::Pending => "Pending",
            OrderState::Confirmed => "Confirmed",
            OrderState::Shipped => "Shipped",
            OrderState::Delivered => "Delivered",
            OrderState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Delivered | OrderState::Cancelled)
    }

    /// Decides what moving from `self` to `next` means.
    ///
    /// Orders advance one way through Pending, Confirmed, Shipped and
    /// Delivered; steps may be skipped but never reversed. Any non-terminal
    /// order can be cancelled, which returns its stock.
    pub fn change_to(self, next: OrderState) -> StatusChange {
        if self == next {
            return match self {
                OrderState::Delivered => StatusChange::AlreadyDelivered,
                _ => StatusChange::Unchanged,
            };
        }
        if self.is_terminal() {
            return StatusChange::Rejected;
        }
        match next {
            OrderState::Cancelled => StatusChange::Apply { restock: true },
            _ if next.id() > self.id() => StatusChange::Apply { restock: false },
            _ => StatusChange::Rejected,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
