//! Typed ID wrappers for state, send, invocation, and actor identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up state ids, send ids, etc.
/// These are just strings underneath — no format requirement. Ids are
/// whatever the machine definition (or the compiler's synthesis) says.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(StateId, "Unique identifier for a state node within a machine.");
typed_id!(SendId, "Identifier for a scheduled (possibly delayed) send.");
typed_id!(InvokeId, "Identifier for an invocation declared on a state node.");
typed_id!(ActorId, "Unique identifier for a running actor (interpreter or child).");
