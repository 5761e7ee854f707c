//! Mainland mobile phone number used on delivery addresses.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Phone`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number cannot be empty")]
    Empty,
    #[error("phone number must be 11 digits starting with 13, 14, 15, 17, 18 or 19")]
    Invalid,
}

/// An 11-digit mobile number: `1`, then one of `3 4 5 7 8 9`, then nine digits.
///
/// ```
/// use freshmart_core::Phone;
///
/// assert!(Phone::parse("13812345678").is_ok());
/// assert!(Phone::parse("12812345678").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Phone(String);

impl Phone {
    pub const LENGTH: usize = 11;

    /// Parse a phone number, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or not a valid mobile number.
    pub fn parse(s: &str) -> Result<Self, PhoneError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PhoneError::Empty);
        }

        let bytes = s.as_bytes();
        let valid = bytes.len() == Self::LENGTH
            && bytes.iter().all(u8::is_ascii_digit)
            && bytes.first() == Some(&b'1')
            && matches!(bytes.get(1), Some(b'3' | b'4' | b'5' | b'7' | b'8' | b'9'));

        if valid {
            Ok(Self(s.to_owned()))
        } else {
            Err(PhoneError::Invalid)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Phone {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        for p in ["13012345678", "14700000000", "15999999999", "17711112222", "18800001111", "19912345678"] {
            assert!(Phone::parse(p).is_ok(), "{p}");
        }
        assert_eq!(Phone::parse(" 13812345678 ").unwrap().as_str(), "13812345678");
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Phone::parse(""), Err(PhoneError::Empty));
        assert_eq!(Phone::parse("   "), Err(PhoneError::Empty));
        assert_eq!(Phone::parse("12812345678"), Err(PhoneError::Invalid));
        assert_eq!(Phone::parse("16812345678"), Err(PhoneError::Invalid));
        assert_eq!(Phone::parse("1381234567"), Err(PhoneError::Invalid));
        assert_eq!(Phone::parse("138123456789"), Err(PhoneError::Invalid));
        assert_eq!(Phone::parse("1381234567a"), Err(PhoneError::Invalid));
        assert_eq!(Phone::parse("23812345678"), Err(PhoneError::Invalid));
    }
}
