//! Strongly typed integer identifiers allocated by the store.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! store_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

store_id!(
    /// Identifier for a movie entity.
    MovieId
);
store_id!(
    /// Identifier for a configured library root.
    LibraryId
);
store_id!(
    /// Identifier for a persisted job row.
    JobId
);
store_id!(
    /// Identifier for an asset candidate row.
    AssetCandidateId
);
store_id!(
    /// Identifier for a trailer candidate row.
    TrailerCandidateId
);
store_id!(
    /// Identifier for an actor row.
    ActorId
);
store_id!(
    /// Identifier for any person-like related row (director, writer).
    PersonId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_plain_integers() {
        assert_eq!(MovieId(42).to_string(), "42");
        assert_eq!(JobId(7).as_i64(), 7);
    }
}
