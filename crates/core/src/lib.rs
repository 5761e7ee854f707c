//! Freshmart Core - Shared domain types.
//!
//! This crate provides the types used across all Freshmart components:
//! - `storefront` - Public shop (catalog, cart, orders, accounts)
//! - `cli` - Command-line tools for migrations and catalog management
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Database encoding for the newtypes is available
//! behind the `postgres` feature.
//!
//! # Modules
//!
//! - [`types`] - IDs, money, email/phone validation, order statuses, pagination

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
