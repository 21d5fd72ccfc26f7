//! Identifier newtypes for the task domain.
//!
//! Plain strings travel over the wire; inside the engine every reference is
//! a distinct newtype so a user id can never be passed where a task id is
//! expected. Construction via `new`/`From` is unvalidated (trusted,
//! application-controlled input) — structural validation of external input
//! happens in [`crate::event`].

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is the empty string.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Convert the identifier into its inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_type! {
    /// Unique identifier of a catalog task.
    TaskId
}

id_type! {
    /// Unique identifier of a user.
    UserId
}

id_type! {
    /// Globally unique identifier of an inbound event; the idempotency
    /// ledger is keyed by this.
    EventId
}

id_type! {
    /// Originating room/session of an event. Optional, informational only.
    RoomId
}

id_type! {
    /// Storage-assigned identifier of a progress record.
    ProgressId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_accessors() {
        let id = TaskId::new("task-123");
        assert_eq!(id.as_str(), "task-123");
        assert!(!id.is_empty());
        assert_eq!(id.into_inner(), "task-123");
    }

    #[test]
    fn from_conversions() {
        let a = UserId::from("user-1");
        let b = UserId::from("user-1".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn display() {
        let id = EventId::new("evt-42");
        assert_eq!(format!("{id}"), "evt-42");
    }

    #[test]
    fn empty_is_detectable() {
        assert!(EventId::new("").is_empty());
    }
}
