//! Identifier types for roomsync.
//!
//! Matrix identifiers are opaque strings on the wire. They are wrapped in
//! newtypes so a room id can never be passed where an event id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
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
    /// A room identifier, e.g. `!abc:example.org`.
    RoomId
);

string_id!(
    /// A server-assigned event identifier, e.g. `$xyz`.
    EventId
);

string_id!(
    /// A fully qualified user identifier, e.g. `@alice:example.org`.
    UserId
);

string_id!(
    /// Client-generated idempotency token for a send.
    ///
    /// The homeserver echoes it back in `unsigned.transaction_id` of the
    /// event when it reaches the sender's own sync stream.
    TxnId
);

impl TxnId {
    /// Generate a fresh, random transaction id.
    pub fn generate() -> Self {
        Self(format!("rs{}", uuid::Uuid::new_v4().simple()))
    }
}
