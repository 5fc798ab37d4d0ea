//! Value objects identifying users, rooms and sessions.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValueObjectError;

/// Maximum length (in characters) for identifiers and names.
pub const MAX_NAME_LENGTH: usize = 64;

fn validate(field: &'static str, value: &str) -> Result<(), ValueObjectError> {
    if value.trim().is_empty() {
        return Err(ValueObjectError::Empty(field));
    }
    let length = value.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(ValueObjectError::TooLong {
            field,
            max: MAX_NAME_LENGTH,
            actual: length,
        });
    }
    Ok(())
}

macro_rules! string_value_object {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: String) -> Result<Self, ValueObjectError> {
                validate($field, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValueObjectError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_value_object!(
    /// Stable user identifier supplied by the auth layer.
    UserId,
    "user_id"
);

string_value_object!(
    /// Human-readable name shown as the sender of broadcasts.
    DisplayName,
    "display_name"
);

string_value_object!(
    /// Room identifier, assigned when the room is created.
    RoomId,
    "room_id"
);

string_value_object!(
    /// Human-readable room name, unique among live rooms.
    RoomName,
    "room_name"
);

impl RoomId {
    /// Generate a fresh random room identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl RoomName {
    /// Room names are compared after trimming surrounding whitespace.
    pub fn parse(value: &str) -> Result<Self, ValueObjectError> {
        Self::new(value.trim().to_string())
    }
}

/// Identifies one accepted connection of a user.
///
/// A user may reconnect after a disconnect; the session id lets the manager
/// ignore teardown requests that belong to an older connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
