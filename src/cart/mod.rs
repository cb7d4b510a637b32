//! Per-buyer shopping cart.
//!
//! [`Cart`] is a plain value: it knows nothing about storage or the
//! database. [`crate::services::cart::CartService`] loads it from a
//! [`CartStore`], applies one operation and writes the snapshot back.

use crate::entities::product;
use crate::errors::ServiceError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

mod store;

pub use store::{CartStore, FileCartStore, MemoryCartStore};

/// Product fields captured into the cart when a line is added or refreshed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartProduct {
    pub product_id: i32,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
    pub farmer_id: Uuid,
}

impl From<&product::Model> for CartProduct {
    fn from(model: &product::Model) -> Self {
        Self {
            product_id: model.product_id,
            name: model.name.clone(),
            price: model.price,
            stock: model.stock,
            image_url: model.image_url.clone(),
            farmer_id: model.farmer_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: CartProduct,
    pub quantity: i32,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// Quantities keyed by product id. Serializes as
/// `{ "<product_id>": { "product": {...}, "quantity": n } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: BTreeMap<i32, CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` units, merging with an existing line.
    pub fn add(&mut self, product: CartProduct, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        if product.stock <= 0 {
            return Err(ServiceError::OutOfStock(product.name));
        }

        let current = self.quantity_of(product.product_id);
        let requested = match current.checked_add(quantity) {
            Some(requested) if requested <= product.stock => requested,
            _ => {
                return Err(ServiceError::QuantityExceedsStock {
                    requested: current.saturating_add(quantity),
                    available: product.stock,
                })
            }
        };

        self.lines.insert(
            product.product_id,
            CartLine {
                product,
                quantity: requested,
            },
        );
        Ok(())
    }

    /// Sets a line's quantity; zero or less removes it.
    pub fn update_quantity(&mut self, product_id: i32, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            self.remove(product_id);
            return Ok(());
        }

        let line = self.lines.get_mut(&product_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
        })?;

        if quantity > line.product.stock {
            return Err(ServiceError::QuantityExceedsStock {
                requested: quantity,
                available: line.product.stock,
            });
        }

        line.quantity = quantity;
        Ok(())
    }

    /// Replaces the stored snapshot of a product already in the cart.
    pub fn refresh(&mut self, product: CartProduct) {
        if let Some(line) = self.lines.get_mut(&product.product_id) {
            line.product = product;
        }
    }

    pub fn remove(&mut self, product_id: i32) {
        self.lines.remove(&product_id);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Sum of price times quantity, rounded to cents
    pub fn total(&self) -> Decimal {
        self.lines
            .values()
            .map(CartLine::line_total)
            .sum::<Decimal>()
            .round_dp(2)
    }

    pub fn quantity_of(&self, product_id: i32) -> i32 {
        self.lines.get(&product_id).map_or(0, |line| line.quantity)
    }

    pub fn item_count(&self) -> i64 {
        self.lines.values().map(|line| i64::from(line.quantity)).sum()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &CartLine> {
        self.lines.values()
    }

    pub fn product_ids(&self) -> Vec<i32> {
        self.lines.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn product(id: i32, price: Decimal, stock: i32) -> CartProduct {
        CartProduct {
            product_id: id,
            name: format!("Product {}", id),
            price,
            stock,
            image_url: None,
            farmer_id: Uuid::nil(),
        }
    }

    #[test]
    fn add_merges_quantities() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(9.99), 5), 2).unwrap();
        cart.add(product(1, dec!(9.99), 5), 1).unwrap();
        assert_eq!(cart.quantity_of(1), 3);
        assert_eq!(cart.total(), dec!(29.97));
    }

    #[test]
    fn add_cannot_overflow_past_stock() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(9.99), 5), 1).unwrap();
        assert_matches!(
            cart.add(product(1, dec!(9.99), 5), i32::MAX),
            Err(ServiceError::QuantityExceedsStock {
                requested: i32::MAX,
                available: 5
            })
        );
        assert_eq!(cart.quantity_of(1), 1);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total(), dec!(9.99));
    }

    #[test]
    fn item_count_sums_without_overflow() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(0.01), i32::MAX), i32::MAX).unwrap();
        cart.add(product(2, dec!(0.01), i32::MAX), i32::MAX).unwrap();
        assert_eq!(cart.item_count(), 2 * i64::from(i32::MAX));
        assert_eq!(cart.line_count(), 2);
    }

    #[test]
    fn add_rejects_out_of_stock() {
        let mut cart = Cart::new();
        assert_matches!(
            cart.add(product(1, dec!(1.00), 0), 1),
            Err(ServiceError::OutOfStock(_))
        );
        assert!(cart.is_empty());
    }

    #[test]
    fn add_beyond_stock_leaves_cart_unchanged() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(2.50), 3), 3).unwrap();
        assert_matches!(
            cart.add(product(1, dec!(2.50), 3), 1),
            Err(ServiceError::QuantityExceedsStock {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(cart.quantity_of(1), 3);
    }

    #[test]
    fn add_rejects_non_positive_quantity() {
        let mut cart = Cart::new();
        assert_matches!(
            cart.add(product(1, dec!(1.00), 3), 0),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn update_quantity_sets_removes_and_bounds() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(4.00), 5), 1).unwrap();

        cart.update_quantity(1, 4).unwrap();
        assert_eq!(cart.quantity_of(1), 4);

        assert_matches!(
            cart.update_quantity(1, 6),
            Err(ServiceError::QuantityExceedsStock { .. })
        );
        assert_eq!(cart.quantity_of(1), 4);

        cart.update_quantity(1, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn update_quantity_of_missing_line() {
        let mut cart = Cart::new();
        assert_matches!(cart.update_quantity(9, 2), Err(ServiceError::NotFound(_)));
        assert!(cart.update_quantity(9, -1).is_ok());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(1.00), 1), 1).unwrap();
        cart.remove(1);
        cart.remove(1);
        assert!(cart.is_empty());
    }

    #[test]
    fn total_rounds_to_cents() {
        let mut cart = Cart::new();
        cart.add(product(1, dec!(0.333), 10), 3).unwrap();
        cart.add(product(2, dec!(1.10), 10), 2).unwrap();
        assert_eq!(cart.total(), dec!(3.20));
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn serializes_keyed_by_product_id() {
        let mut cart = Cart::new();
        cart.add(product(42, dec!(3.00), 9), 2).unwrap();
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["42"]["quantity"], 2);
        assert_eq!(json["42"]["product"]["product_id"], 42);

        let back: Cart = serde_json::from_value(json).unwrap();
        assert_eq!(back, cart);
    }
}
