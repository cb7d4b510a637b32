use crate::{
    auth::AuthUser,
    entities::{category, order_item, product, ProductStatus, UserRole},
    errors::ServiceError,
    events::{Event, EventSender},
    realtime::{ChangeEvent, ChangeFeed, FeedTable},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func, LikeExpr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Who may see or change which product
pub struct CatalogPolicy;

impl CatalogPolicy {
    pub fn can_view(user: &AuthUser, product: &product::Model) -> bool {
        match user.role {
            UserRole::Admin => true,
            UserRole::Farmer => product.is_owned_by(user.user_id) || product.is_approved(),
            UserRole::Buyer => product.is_approved(),
        }
    }

    pub fn ensure_can_create(user: &AuthUser) -> Result<(), ServiceError> {
        if user.is_farmer() {
            Ok(())
        } else {
            Err(ServiceError::AuthorizationError(
                "Only farmers can list products".to_string(),
            ))
        }
    }

    /// Edits and deletes are limited to the owning farmer.
    pub fn ensure_can_modify(
        user: &AuthUser,
        product: &product::Model,
    ) -> Result<(), ServiceError> {
        match user.role {
            UserRole::Farmer if product.is_owned_by(user.user_id) => Ok(()),
            UserRole::Farmer => Err(ServiceError::AuthorizationError(format!(
                "Product {} belongs to another farmer",
                product.product_id
            ))),
            UserRole::Admin => Err(ServiceError::AuthorizationError(
                "Admins can only change a product's status".to_string(),
            )),
            UserRole::Buyer => Err(ServiceError::AuthorizationError(
                "Buyers cannot modify products".to_string(),
            )),
        }
    }

    pub fn ensure_can_moderate(user: &AuthUser) -> Result<(), ServiceError> {
        if user.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::AuthorizationError(
                "Only admins can approve or reject products".to_string(),
            ))
        }
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price <= Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("Price must be greater than zero".into());
        return Err(err);
    }
    if price.scale() > 2 && price.round_dp(2) != *price {
        let mut err = ValidationError::new("price");
        err.message = Some("Price cannot have more than two decimal places".into());
        return Err(err);
    }
    Ok(())
}

/// Fields a farmer supplies when listing or editing a product
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductInput {
    #[validate(length(min = 2, max = 200, message = "Name must be at least 2 characters"))]
    pub name: String,
    #[validate(length(min = 10, message = "Description must be at least 10 characters"))]
    pub description: String,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    pub category_id: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    /// Case-insensitive name substring
    pub search: Option<String>,
    pub category_id: Option<i32>,
    /// Ignored for buyers, who only ever see approved listings
    pub status: Option<ProductStatus>,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CategoryInput {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    pub description: Option<String>,
}

pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    feed: ChangeFeed,
}

impl CatalogService {
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

    /// Lists products visible to the caller. Returns the page and the total match count.
    #[instrument(skip(self, user), fields(user_id = %user.user_id, role = %user.role))]
    pub async fn list_products(
        &self,
        user: &AuthUser,
        filter: ProductFilter,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let mut query = product::Entity::find();

        query = match user.role {
            UserRole::Admin => query,
            UserRole::Farmer => query.filter(product::Column::FarmerId.eq(user.user_id)),
            UserRole::Buyer => query.filter(product::Column::Status.eq(ProductStatus::Approved)),
        };

        if let Some(status) = filter.status.filter(|_| !user.is_buyer()) {
            query = query.filter(product::Column::Status.eq(status));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(name_matches(search));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .order_by_desc(product::Column::ProductId)
            .paginate(&*self.db, filter.per_page.max(1));

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(filter.page.max(1) - 1).await?;
        Ok((products, total))
    }

    /// Fetches one product; hidden products read as missing.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn get_product(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<product::Model, ServiceError> {
        let found = self.find_product(product_id).await?;
        if CatalogPolicy::can_view(user, &found) {
            Ok(found)
        } else {
            Err(not_found(product_id))
        }
    }

    /// Lists a new product for moderation.
    #[instrument(skip(self, user, input), fields(user_id = %user.user_id, name = %input.name))]
    pub async fn create_product(
        &self,
        user: &AuthUser,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        CatalogPolicy::ensure_can_create(user)?;
        input.validate()?;
        self.ensure_category(input.category_id).await?;

        let created = product::ActiveModel {
            name: Set(input.name.trim().to_string()),
            description: Set(input.description.trim().to_string()),
            image_url: Set(input.image_url),
            price: Set(input.price),
            stock: Set(input.stock),
            status: Set(ProductStatus::Pending),
            farmer_id: Set(user.user_id),
            category_id: Set(input.category_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = created.product_id, "product created");
        self.event_sender
            .send_or_log(Event::ProductCreated {
                product_id: created.product_id,
                farmer_id: user.user_id,
            })
            .await;
        self.feed
            .publish(ChangeEvent::insert(FeedTable::Products, &created));

        Ok(created)
    }

    /// Edits the details of a farmer's own product. Status never changes here.
    #[instrument(skip(self, user, input), fields(user_id = %user.user_id))]
    pub async fn update_product(
        &self,
        user: &AuthUser,
        product_id: i32,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        let existing = self.find_product(product_id).await?;
        CatalogPolicy::ensure_can_modify(user, &existing)?;
        input.validate()?;
        if input.category_id != existing.category_id {
            self.ensure_category(input.category_id).await?;
        }

        let mut active: product::ActiveModel = existing.clone().into();
        active.name = Set(input.name.trim().to_string());
        active.description = Set(input.description.trim().to_string());
        active.image_url = Set(input.image_url);
        active.price = Set(input.price);
        active.stock = Set(input.stock);
        active.category_id = Set(input.category_id);
        let updated = active.update(&*self.db).await?;

        info!(product_id, "product updated");
        self.event_sender
            .send_or_log(Event::ProductUpdated {
                product_id,
                farmer_id: user.user_id,
            })
            .await;
        self.feed
            .publish(ChangeEvent::update(FeedTable::Products, &existing, &updated));

        Ok(updated)
    }

    /// Removes a farmer's own product. Products already ordered are kept.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn delete_product(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<(), ServiceError> {
        let existing = self.find_product(product_id).await?;
        CatalogPolicy::ensure_can_modify(user, &existing)?;

        let ordered = order_item::Entity::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .count(&*self.db)
            .await?;
        if ordered > 0 {
            return Err(ServiceError::ValidationError(format!(
                "Product {} appears in {} order line(s) and cannot be deleted",
                product_id, ordered
            )));
        }

        product::Entity::delete_by_id(product_id)
            .exec(&*self.db)
            .await?;

        info!(product_id, "product deleted");
        self.event_sender
            .send_or_log(Event::ProductDeleted {
                product_id,
                farmer_id: user.user_id,
            })
            .await;
        self.feed
            .publish(ChangeEvent::delete(FeedTable::Products, &existing));
        Ok(())
    }

    /// Approves or rejects a listing. Re-applying the current status is a no-op.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn set_product_status(
        &self,
        user: &AuthUser,
        product_id: i32,
        status: ProductStatus,
    ) -> Result<product::Model, ServiceError> {
        CatalogPolicy::ensure_can_moderate(user)?;
        if status == ProductStatus::Pending {
            return Err(ServiceError::InvalidStatus(
                "Products can only be moved to Approved or Rejected".to_string(),
            ));
        }

        let existing = self.find_product(product_id).await?;
        if existing.status == status {
            return Ok(existing);
        }
        if !existing.status.can_transition_to(status) {
            return Err(ServiceError::InvalidTransition(format!(
                "Product {} cannot move from {} to {}",
                product_id, existing.status, status
            )));
        }

        let mut active: product::ActiveModel = existing.clone().into();
        active.status = Set(status);
        let updated = active.update(&*self.db).await?;

        info!(product_id, from = %existing.status, to = %status, "product moderated");
        self.event_sender
            .send_or_log(Event::ProductStatusChanged {
                product_id,
                admin_id: user.user_id,
                old_status: existing.status,
                new_status: status,
            })
            .await;
        self.feed
            .publish(ChangeEvent::update(FeedTable::Products, &existing, &updated));

        Ok(updated)
    }

    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        Ok(category::Entity::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, user, input), fields(user_id = %user.user_id, name = %input.name))]
    pub async fn create_category(
        &self,
        user: &AuthUser,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        user.require_any(&[UserRole::Admin])?;
        input.validate()?;
        let name = input.name.trim().to_string();

        let duplicate = category::Entity::find()
            .filter(category::Column::Name.eq(name.clone()))
            .one(&*self.db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::ValidationError(format!(
                "Category '{}' already exists",
                name
            )));
        }

        let created = category::ActiveModel {
            name: Set(name),
            description: Set(input.description.filter(|d| !d.trim().is_empty())),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;
        Ok(created)
    }

    async fn find_product(&self, product_id: i32) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| not_found(product_id))
    }

    async fn ensure_category(&self, category_id: i32) -> Result<(), ServiceError> {
        category::Entity::find_by_id(category_id)
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("Category {} does not exist", category_id))
            })
    }
}

const LIKE_ESCAPE: char = '!';

/// `LOWER(name) LIKE '%term%'` with the term's own wildcards escaped.
fn name_matches(search: &str) -> SimpleExpr {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');

    Expr::expr(Func::lower(Expr::col((product::Entity, product::Column::Name))))
        .like(LikeExpr::new(pattern).escape(LIKE_ESCAPE))
}

fn not_found(product_id: i32) -> ServiceError {
    ServiceError::NotFound(format!("Product {}", product_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn user(role: UserRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            name: "Test".to_string(),
            email: "t@example.test".to_string(),
            role,
            token_id: "jti".to_string(),
            expires_at: 0,
        }
    }

    fn listing(owner: Uuid, status: ProductStatus) -> product::Model {
        product::Model {
            product_id: 1,
            name: "Kale".to_string(),
            description: "Curly green kale".to_string(),
            image_url: None,
            price: dec!(3.50),
            stock: 10,
            status,
            farmer_id: owner,
            category_id: 1,
            created_at: Utc::now(),
        }
    }

    fn input() -> ProductInput {
        ProductInput {
            name: "Kale".to_string(),
            description: "Curly green kale, picked daily".to_string(),
            image_url: Some("https://img.test/kale.png".to_string()),
            price: dec!(3.50),
            stock: 10,
            category_id: 1,
        }
    }

    #[test]
    fn buyers_only_see_approved() {
        let buyer = user(UserRole::Buyer);
        assert!(!CatalogPolicy::can_view(&buyer, &listing(Uuid::new_v4(), ProductStatus::Pending)));
        assert!(!CatalogPolicy::can_view(
            &buyer,
            &listing(Uuid::new_v4(), ProductStatus::Rejected)
        ));
        assert!(CatalogPolicy::can_view(&buyer, &listing(Uuid::new_v4(), ProductStatus::Approved)));
    }

    #[test]
    fn farmers_see_own_and_approved() {
        let farmer = user(UserRole::Farmer);
        assert!(CatalogPolicy::can_view(&farmer, &listing(farmer.user_id, ProductStatus::Pending)));
        assert!(!CatalogPolicy::can_view(
            &farmer,
            &listing(Uuid::new_v4(), ProductStatus::Pending)
        ));
        assert!(CatalogPolicy::can_view(
            &farmer,
            &listing(Uuid::new_v4(), ProductStatus::Approved)
        ));
    }

    #[test]
    fn only_owner_may_modify() {
        let farmer = user(UserRole::Farmer);
        let admin = user(UserRole::Admin);
        let own = listing(farmer.user_id, ProductStatus::Approved);
        let other = listing(Uuid::new_v4(), ProductStatus::Approved);

        assert!(CatalogPolicy::ensure_can_modify(&farmer, &own).is_ok());
        assert!(matches!(
            CatalogPolicy::ensure_can_modify(&farmer, &other),
            Err(ServiceError::AuthorizationError(_))
        ));
        assert!(matches!(
            CatalogPolicy::ensure_can_modify(&admin, &own),
            Err(ServiceError::AuthorizationError(_))
        ));
        assert!(CatalogPolicy::ensure_can_moderate(&admin).is_ok());
        assert!(CatalogPolicy::ensure_can_moderate(&farmer).is_err());
    }

    #[test]
    fn name_search_lowercases_both_sides() {
        use sea_orm::{DbBackend, QueryTrait};

        let sql = product::Entity::find()
            .filter(name_matches("Chard"))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#"LOWER("products"."name") LIKE '%chard%'"#), "{}", sql);

        let sql = product::Entity::find()
            .filter(name_matches("50%"))
            .build(DbBackend::Sqlite)
            .to_string();
        assert!(sql.contains("ESCAPE"), "{}", sql);
        assert!(!sql.contains("'%50%%'"), "{}", sql);
    }

    #[test]
    fn product_input_validation() {
        assert!(input().validate().is_ok());

        let mut short = input();
        short.name = "K".to_string();
        assert!(short.validate().is_err());

        let mut terse = input();
        terse.description = "kale".to_string();
        assert!(terse.validate().is_err());

        let mut free = input();
        free.price = dec!(0);
        assert!(free.validate().is_err());

        let mut negative = input();
        negative.stock = -1;
        assert!(negative.validate().is_err());

        let mut bad_url = input();
        bad_url.image_url = Some("not a url".to_string());
        assert!(bad_url.validate().is_err());

        let mut no_image = input();
        no_image.image_url = None;
        assert!(no_image.validate().is_ok());
    }
}
