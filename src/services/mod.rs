// Marketplace services
pub mod activity;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod dashboard;
pub mod orders;
pub mod ratings;

// Service factory for dependency injection
pub mod factory;
