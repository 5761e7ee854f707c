//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `address` - Delivery address form validation
//! - `auth` - Registration, activation and password login
//! - `tokens` - Signed activation tokens
//! - `cart` - Cart mutations validated against stock
//! - `orders` - Checkout, order commit with stock reservation, order history
//! - `payment` - Alipay page-pay and bounded settlement polling
//! - `catalog` - Homepage cache, catalog mutations and static homepage
//! - `events` - Catalog change notifications and the in-process bus
//! - `tasks` - Background task queue and worker
//! - `email` - Activation email over SMTP

pub mod address;
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod email;
pub mod events;
pub mod orders;
pub mod payment;
pub mod tasks;
pub mod tokens;
