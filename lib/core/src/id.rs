//! Identifier newtypes for engine records.
//!
//! Every identifier wraps a ULID and renders as `<prefix>_<ULID>`. Parsing
//! accepts both the prefixed form and a bare ULID so ids from older rows and
//! hand-written requests both resolve.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when an identifier string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type that rejected the input.
    pub id_type: &'static str,
    /// Why the input was rejected.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a fresh identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Wraps an existing ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Display prefix, without the trailing underscore.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// Owner of workflows and credentials.
    UserId,
    "usr"
);

define_id!(
    /// Identifier of a stored workflow definition.
    WorkflowId,
    "wf"
);

define_id!(
    /// Identifier of one Execution record.
    ExecutionId,
    "exec"
);

define_id!(
    /// Identifier of a NodeExecution record within an Execution.
    NodeExecutionId,
    "nexec"
);

define_id!(
    /// Identifier of a stored credential.
    CredentialId,
    "cred"
);

define_id!(
    /// Idempotency key of a run request.
    ///
    /// Every durable step of a run is memoized under this id, and the
    /// Execution record is looked up by it when the run is finalized.
    CorrelationId,
    "evt"
);
