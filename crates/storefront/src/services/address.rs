//! Delivery address form validation.

use serde::Deserialize;
use thiserror::Error;

use freshmart_core::{Phone, PhoneError};

use crate::models::NewAddress;

/// Errors shown back on the address form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Receiver, address or phone was left empty.
    #[error("missing required fields")]
    MissingFields,

    /// The phone is not a valid mobile number.
    #[error("invalid phone: {0}")]
    InvalidPhone(#[from] PhoneError),
}

impl AddressError {
    /// Message shown on the form.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::MissingFields => "Receiver, address and phone are required",
            Self::InvalidPhone(_) => "The phone number is not valid",
        }
    }
}

/// Body of `POST /user/address`.
#[derive(Debug, Default, Deserialize)]
pub struct AddressForm {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub addr: String,
    pub zip_code: Option<String>,
    #[serde(default)]
    pub phone: String,
}

impl AddressForm {
    /// Check the required fields and the phone format.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first problem found.
    pub fn validate(&self) -> Result<NewAddress, AddressError> {
        let receiver = self.receiver.trim();
        let addr = self.addr.trim();
        if receiver.is_empty() || addr.is_empty() || self.phone.trim().is_empty() {
            return Err(AddressError::MissingFields);
        }

        let phone = Phone::parse(&self.phone)?;
        let zip_code = self
            .zip_code
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .map(str::to_owned);

        Ok(NewAddress {
            receiver: receiver.to_owned(),
            addr: addr.to_owned(),
            zip_code,
            phone,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn form(receiver: &str, addr: &str, zip: Option<&str>, phone: &str) -> AddressForm {
        AddressForm {
            receiver: receiver.to_string(),
            addr: addr.to_string(),
            zip_code: zip.map(str::to_string),
            phone: phone.to_string(),
        }
    }

    #[test]
    fn test_validate_ok() {
        let address = form(" Li Lei ", "1 Main St", Some(""), "13812345678")
            .validate()
            .unwrap();
        assert_eq!(address.receiver, "Li Lei");
        assert_eq!(address.zip_code, None);
        assert_eq!(address.phone.as_str(), "13812345678");
    }

    #[test]
    fn test_validate_keeps_zip() {
        let address = form("a", "b", Some("100000"), "15912345678")
            .validate()
            .unwrap();
        assert_eq!(address.zip_code.as_deref(), Some("100000"));
    }

    #[test]
    fn test_validate_missing_fields() {
        assert_eq!(
            form("", "b", None, "13812345678").validate().unwrap_err(),
            AddressError::MissingFields
        );
        assert_eq!(
            form("a", "b", None, "  ").validate().unwrap_err(),
            AddressError::MissingFields
        );
    }

    #[test]
    fn test_validate_bad_phone() {
        assert_eq!(
            form("a", "b", None, "12812345678").validate().unwrap_err(),
            AddressError::InvalidPhone(PhoneError::Invalid)
        );
    }
}
