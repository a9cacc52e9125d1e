//! Strongly-typed identifiers for Splice entities.
//!
//! All identifiers are:
//! - **Strongly typed**: a `JobId` cannot be passed where a `PlanId` is
//!   expected
//! - **Lexicographically sortable**: ULIDs encode creation time and sort
//!   naturally
//! - **Globally unique**: no coordination required for generation
//!
//! # Example
//!
//! ```rust
//! use splice_core::id::{FeatureId, JobId};
//!
//! let feature = FeatureId::generate();
//! let job = JobId::generate();
//!
//! // IDs are different types - this won't compile:
//! // let wrong: FeatureId = job;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            ///
            /// Uses ULID generation, which is lexicographically sortable by
            /// creation time and globally unique without coordination.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the identifier.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
                chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!(concat!("invalid ", $label, " ID '{}': {}"), s, e),
                    })
            }
        }
    };
}

define_id!(
    /// Identifier for a prioritized feature produced by the upstream
    /// analysis pipeline.
    FeatureId,
    "feature"
);

define_id!(
    /// Identifier for one integration job (a single execution attempt of
    /// applying a feature under a strategy).
    JobId,
    "job"
);

define_id!(
    /// Identifier for one recorded code change within a job.
    ///
    /// Code changes form the append-only ledger rollback plans are derived
    /// from.
    ChangeId,
    "change"
);

define_id!(
    /// Identifier for a rollback plan derived from an integration result.
    PlanId,
    "plan"
);

define_id!(
    /// Identifier for a single step within a rollback plan.
    StepId,
    "step"
);

define_id!(
    /// Identifier for one execution of a rollback plan.
    ExecutionId,
    "execution"
);

define_id!(
    /// Identifier for a rollback trigger registered against a live feature.
    TriggerId,
    "trigger"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_id_roundtrip() {
        let id = FeatureId::generate();
        let s = id.to_string();
        let parsed: FeatureId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn execution_id_roundtrip() {
        let id = ExecutionId::generate();
        let s = id.to_string();
        let parsed: ExecutionId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_are_unique() {
        let id1 = JobId::generate();
        let id2 = JobId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_sort_by_creation_order() {
        let earlier = ChangeId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = ChangeId::generate();
        assert!(earlier < later);
    }

    #[test]
    fn invalid_id_returns_error() {
        let result: Result<PlanId> = "not-a-valid-ulid".parse();
        assert!(result.is_err());
    }
}
