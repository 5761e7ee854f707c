//! Core types for Freshmart.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod id;
pub mod money;
pub mod page;
pub mod phone;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use money::Money;
pub use page::{Paginator, page_window};
pub use phone::{Phone, PhoneError};
pub use status::*;
