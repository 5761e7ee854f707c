//! User domain types.

use chrono::{DateTime, Utc};

use freshmart_core::{Email, UserId};

/// A shop account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: Email,
    /// Set once the emailed activation link has been followed.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
