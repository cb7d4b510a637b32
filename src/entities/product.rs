use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Moderation state of a listing. Only approved products reach buyers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ProductStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Approved")]
    Approved,
    #[sea_orm(string_value = "Rejected")]
    Rejected,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Pending => "Pending",
            ProductStatus::Approved => "Approved",
            ProductStatus::Rejected => "Rejected",
        }
    }

    /// Moderation moves: Pending to a decision, or flipping an earlier decision.
    pub fn can_transition_to(&self, next: ProductStatus) -> bool {
        matches!(
            (self, next),
            (ProductStatus::Pending, ProductStatus::Approved)
                | (ProductStatus::Pending, ProductStatus::Rejected)
                | (ProductStatus::Approved, ProductStatus::Rejected)
                | (ProductStatus::Rejected, ProductStatus::Approved)
        )
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ProductStatus::Pending),
            "approved" => Ok(ProductStatus::Approved),
            "rejected" => Ok(ProductStatus::Rejected),
            other => Err(format!("unknown product status '{}'", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub product_id: i32,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub image_url: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub price: Decimal,
    pub stock: i32,
    pub status: ProductStatus,
    pub farmer_id: Uuid,
    pub category_id: i32,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn is_approved(&self) -> bool {
        self.status == ProductStatus::Approved
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.farmer_id == user_id
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::profile::Entity",
        from = "Column::FarmerId",
        to = "super::profile::Column::Id"
    )]
    Farmer,
    #[sea_orm(
        belongs_to = "super::category::Entity",
        from = "Column::CategoryId",
        to = "super::category::Column::CategoryId"
    )]
    Category,
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::rating::Entity")]
    Ratings,
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
}

impl Related<super::profile::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Farmer.def()
    }
}

impl Related<super::category::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Category.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::rating::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ratings.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_transitions() {
        use ProductStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Approved.can_transition_to(Approved));
    }

    #[test]
    fn status_parses_from_any_case() {
        assert_eq!("approved".parse::<ProductStatus>(), Ok(ProductStatus::Approved));
        assert!("sold".parse::<ProductStatus>().is_err());
    }
}
