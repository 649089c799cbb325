//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Documents, connections and logical changes each get their own
//! strongly-typed ID so they cannot be mixed up at compile time. All IDs
//! use UUID v7 (time-ordered) so documents sort by creation time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a stored document.
    DocumentId
}

define_id! {
    /// Unique identifier for a live real-time connection.
    ConnectionId
}

define_id! {
    /// Identifier shared by every event produced by one logical change.
    ///
    /// A subscriber receives at most one event per `ChangeId`.
    ChangeId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let document = DocumentId::new();
        let connection = ConnectionId::new();
        assert_ne!(document.into_inner(), Uuid::nil());
        assert_ne!(connection.into_inner(), Uuid::nil());
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = DocumentId::new();
        let parsed: Result<DocumentId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
    }

    #[test]
    fn ids_serialize_as_bare_uuid_strings() {
        let id = DocumentId::new();
        let json = serde_json::to_value(id).ok();
        assert_eq!(json, Some(serde_json::Value::String(id.to_string())));
    }

    #[test]
    fn v7_ids_are_time_ordered() {
        let first = ChangeId::new();
        let second = ChangeId::new();
        assert!(first <= second);
    }
}
