//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Unknown ticket status code.
    #[error("invalid ticket status code: {value}")]
    InvalidStatusCode { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// Identifier of a shared resource users request tickets for.
    ResourceId,
    "resource_id"
);

define_string_id!(
    /// Identifier of a user.
    UserId,
    "user_id"
);

define_string_id!(
    /// Identifier of a stored notification record.
    NotificationId,
    "notification_id"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_empty_and_blank_values() {
        assert_eq!(
            UserId::new(""),
            Err(ValidationError::Empty { field: "user_id" })
        );
        assert!(ResourceId::new("   ").is_err());
        assert_eq!(NotificationId::new("n-1").unwrap().as_str(), "n-1");
    }

    #[test]
    fn ids_deserialize_through_validation() {
        let id: ResourceId = serde_json::from_str(r#""printer""#).unwrap();
        assert_eq!(id.to_string(), "printer");

        let result: Result<UserId, _> = serde_json::from_str(r#""""#);
        assert!(result.is_err());
    }
}
