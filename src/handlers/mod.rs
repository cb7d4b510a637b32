pub mod admin;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod common;
pub mod dashboard;
pub mod health;
pub mod orders;
pub mod products;
pub mod ratings;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
