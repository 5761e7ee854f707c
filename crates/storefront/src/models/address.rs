//! Delivery address types.

use serde::Serialize;

use freshmart_core::{AddressId, Phone, UserId};

/// A stored delivery address.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub receiver: String,
    pub addr: String,
    pub zip_code: Option<String>,
    pub phone: String,
    pub is_default: bool,
}

/// A validated address about to be inserted.
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub receiver: String,
    pub addr: String,
    pub zip_code: Option<String>,
    pub phone: Phone,
}
