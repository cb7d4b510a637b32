use crate::{
    auth::AuthUser,
    cart::{Cart, CartProduct, CartStore},
    entities::{product, UserRole},
    errors::ServiceError,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument};
use uuid::Uuid;

/// Cart as returned to buyers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub items: Cart,
    pub item_count: i64,
    pub total: Decimal,
}

impl From<Cart> for CartView {
    fn from(cart: Cart) -> Self {
        Self {
            item_count: cart.item_count(),
            total: cart.total(),
            items: cart,
        }
    }
}

/// Applies cart operations against the buyer's stored snapshot.
///
/// Each load-modify-save runs under a per-buyer lock, so concurrent
/// requests from one buyer apply one after another.
pub struct CartService {
    db: Arc<DatabaseConnection>,
    store: Arc<dyn CartStore>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, store: Arc<dyn CartStore>) -> Self {
        Self {
            db,
            store,
            locks: DashMap::new(),
        }
    }

    /// Holds the buyer's cart until the guard is dropped.
    pub(crate) async fn lock(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(user_id).or_default().value().clone();
        lock.lock_owned().await
    }

    pub async fn get_cart(&self, user: &AuthUser) -> Result<Cart, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        self.store.load(user.user_id).await
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn add_to_cart(
        &self,
        user: &AuthUser,
        product_id: i32,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        let product = self.purchasable_product(product_id).await?;

        let _guard = self.lock(user.user_id).await;
        let mut cart = self.store.load(user.user_id).await?;
        cart.add(CartProduct::from(&product), quantity)?;
        self.store.save(user.user_id, &cart).await?;

        info!(product_id, quantity, "added to cart");
        Ok(cart)
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn update_quantity(
        &self,
        user: &AuthUser,
        product_id: i32,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        let _guard = self.lock(user.user_id).await;
        let mut cart = self.store.load(user.user_id).await?;

        if quantity > 0 {
            match product::Entity::find_by_id(product_id).one(&*self.db).await? {
                Some(product) if product.is_approved() => cart.refresh(CartProduct::from(&product)),
                _ => {
                    cart.remove(product_id);
                    self.store.save(user.user_id, &cart).await?;
                    return Err(ServiceError::NotFound(format!("Product {}", product_id)));
                }
            }
        }

        cart.update_quantity(product_id, quantity)?;
        self.store.save(user.user_id, &cart).await?;
        Ok(cart)
    }

    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn remove_from_cart(
        &self,
        user: &AuthUser,
        product_id: i32,
    ) -> Result<Cart, ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        let _guard = self.lock(user.user_id).await;
        let mut cart = self.store.load(user.user_id).await?;
        cart.remove(product_id);
        self.store.save(user.user_id, &cart).await?;
        Ok(cart)
    }

    pub async fn clear_cart(&self, user: &AuthUser) -> Result<(), ServiceError> {
        user.require_any(&[UserRole::Buyer])?;
        let _guard = self.lock(user.user_id).await;
        self.clear_for(user.user_id).await
    }

    /// Drops a buyer's stored cart; callers hold [`CartService::lock`].
    pub(crate) async fn clear_for(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.store.clear(user_id).await
    }

    async fn purchasable_product(&self, product_id: i32) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .filter(product::Model::is_approved)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {}", product_id)))
    }
}
