//! Database entities for the marketplace schema.

pub mod activity_log;
pub mod category;
pub mod order;
pub mod order_item;
pub mod order_status;
pub mod product;
pub mod profile;
pub mod rating;
pub mod review;

pub use order_status::{OrderState, StatusChange};
pub use product::ProductStatus;
pub use profile::{ProfileView, UserRole};
