use crate::{
    auth::AuthUser,
    entities::{product, profile, rating, review, ProductStatus, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
    realtime::{ChangeEvent, ChangeFeed, FeedTable},
    services::catalog::CatalogPolicy,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RatingInput {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 2000, message = "Review cannot exceed 2000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingSubmission {
    pub rating: rating::Model,
    pub review: Option<review::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewView {
    pub review_id: i32,
    pub product_id: i32,
    pub buyer_id: Uuid,
    pub buyer_name: Option<String>,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Mean rating of one product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RatingSummary {
    pub product_id: i32,
    pub average: Decimal,
    pub count: i64,
}

#[derive(Debug, FromQueryResult)]
struct RatingTotals {
    product_id: i32,
    total: Option<i64>,
    count: i64,
}

impl From<RatingTotals> for RatingSummary {
    fn from(row: RatingTotals) -> Self {
        let average = if row.count > 0 {
            (Decimal::from(row.total.unwrap_or(0)) / Decimal::from(row.count)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        Self {
            product_id: row.product_id,
            average,
            count: row.count,
        }
    }
}

pub struct RatingService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    feed: ChangeFeed,
}

impl RatingService {
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

    /// Records a star rating and, when the comment has text, a review.
    #[instrument(skip(self, user, input), fields(user_id = %user.user_id, rating = input.rating))]
    pub async fn submit(
        &self,
        user: &AuthUser,
        product_id: i32,
        input: RatingInput,
    ) -> Result<RatingSubmission, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        input.validate()?;
        self.visible_product(user, product_id).await?;

        let comment = input
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let rating = rating::ActiveModel {
            buyer_id: Set(user.user_id),
            product_id: Set(product_id),
            rating: Set(input.rating),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let review = match comment {
            Some(comment) => Some(
                review::ActiveModel {
                    buyer_id: Set(user.user_id),
                    product_id: Set(product_id),
                    comment: Set(comment),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?,
            ),
            None => None,
        };
        txn.commit().await?;

        counter!("agrimarket.ratings_submitted", 1);
        info!(product_id, with_review = review.is_some(), "rating submitted");

        self.event_sender
            .send_or_log(Event::RatingSubmitted {
                product_id,
                buyer_id: user.user_id,
                rating: rating.rating,
                with_review: review.is_some(),
            })
            .await;
        self.feed
            .publish(ChangeEvent::insert(FeedTable::Ratings, &rating));

        Ok(RatingSubmission { rating, review })
    }

    pub async fn product_ratings(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<Vec<rating::Model>, ServiceError> {
        self.visible_product(user, product_id).await?;
        Ok(rating::Entity::find()
            .filter(rating::Column::ProductId.eq(product_id))
            .order_by_desc(rating::Column::CreatedAt)
            .order_by_desc(rating::Column::RatingId)
            .all(&*self.db)
            .await?)
    }

    pub async fn product_reviews(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<Vec<ReviewView>, ServiceError> {
        self.visible_product(user, product_id).await?;

        let reviews = review::Entity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .order_by_desc(review::Column::ReviewId)
            .all(&*self.db)
            .await?;

        let buyer_ids: HashSet<Uuid> = reviews.iter().map(|r| r.buyer_id).collect();
        let names: HashMap<Uuid, String> = if buyer_ids.is_empty() {
            HashMap::new()
        } else {
            profile::Entity::find()
                .filter(profile::Column::Id.is_in(buyer_ids))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|p| (p.id, p.name))
                .collect()
        };

        Ok(reviews
            .into_iter()
            .map(|r| ReviewView {
                review_id: r.review_id,
                product_id: r.product_id,
                buyer_name: names.get(&r.buyer_id).cloned(),
                buyer_id: r.buyer_id,
                comment: r.comment,
                created_at: r.created_at,
            })
            .collect())
    }

    /// Average rating for every rated product the caller can see.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn averages(&self, user: &AuthUser) -> Result<Vec<RatingSummary>, ServiceError> {
        let mut query = rating::Entity::find()
            .select_only()
            .column(rating::Column::ProductId)
            .column_as(rating::Column::Rating.sum(), "total")
            .column_as(rating::Column::RatingId.count(), "count")
            .group_by(rating::Column::ProductId)
            .order_by_asc(rating::Column::ProductId);

        if let Some(visible) = self.visible_condition(user).await? {
            query = query.filter(rating::Column::ProductId.is_in(visible));
        }

        Ok(query
            .into_model::<RatingTotals>()
            .all(&*self.db)
            .await?
            .into_iter()
            .map(RatingSummary::from)
            .collect())
    }

    /// Average for a single product; unrated products report a zero count.
    pub async fn average_for(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<RatingSummary, ServiceError> {
        self.visible_product(user, product_id).await?;

        let totals = rating::Entity::find()
            .select_only()
            .column(rating::Column::ProductId)
            .column_as(rating::Column::Rating.sum(), "total")
            .column_as(rating::Column::RatingId.count(), "count")
            .filter(rating::Column::ProductId.eq(product_id))
            .group_by(rating::Column::ProductId)
            .into_model::<RatingTotals>()
            .one(&*self.db)
            .await?;

        Ok(totals.map(RatingSummary::from).unwrap_or(RatingSummary {
            product_id,
            average: Decimal::ZERO,
            count: 0,
        }))
    }

    async fn visible_product(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(|p| CatalogPolicy::can_view(user, p))
            .ok_or_else(|| ServiceError::NotFound(format!("Product {}", product_id)))
    }

    /// Product ids the caller may see, or `None` when everything is visible.
    async fn visible_condition(&self, user: &AuthUser) -> Result<Option<Vec<i32>>, ServiceError> {
        let condition = match user.role {
            UserRole::Admin => return Ok(None),
            UserRole::Buyer => {
                Condition::all().add(product::Column::Status.eq(ProductStatus::Approved))
            }
            UserRole::Farmer => Condition::any()
                .add(product::Column::Status.eq(ProductStatus::Approved))
                .add(product::Column::FarmerId.eq(user.user_id)),
        };

        let ids: Vec<i32> = product::Entity::find()
            .select_only()
            .column(product::Column::ProductId)
            .filter(condition)
            .into_tuple()
            .all(&*self.db)
            .await?;
        Ok(Some(ids))
    }
}
