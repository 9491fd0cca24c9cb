use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest identifier accepted from callers or collaborators.
pub const MAX_ID_LEN: usize = 64;

/// Errors raised when parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} is longer than {max} characters")]
    TooLong { kind: &'static str, max: usize },

    #[error("{kind} contains invalid character {ch:?}")]
    InvalidChar { kind: &'static str, ch: char },
}

fn validate(kind: &'static str, raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty { kind });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(IdError::TooLong {
            kind,
            max: MAX_ID_LEN,
        });
    }
    if let Some(ch) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(IdError::InvalidChar { kind, ch });
    }
    Ok(())
}

/// Declares a validated, string-backed identifier.
///
/// Identifiers come from other services (Mongo object ids, processor ids),
/// so they are opaque strings restricted to `[A-Za-z0-9_-]{1,64}`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parses and validates an identifier.
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                validate($kind, &raw)?;
                Ok(Self(raw))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(raw: &str) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a student account (owned by the identity service).
    UserId,
    "user id"
);

string_id!(
    /// Identifier of a course (owned by the catalog service).
    CourseId,
    "course id"
);

string_id!(
    /// Identifier of an order created at the payment processor.
    OrderId,
    "order id"
);

string_id!(
    /// Identifier of a settled payment at the payment processor.
    PaymentId,
    "payment id"
);
