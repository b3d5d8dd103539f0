use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates a new ID from a raw database value.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the underlying ID value.
            pub fn get(self) -> i64 {
                self.0
            }

            /// Returns true when the ID is strictly positive.
            pub fn is_positive(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Surrogate identity of a row in the association table.
    ///
    /// Never changes once assigned: moving an association to another tag
    /// keeps its ID, copying produces a new one.
    AssociationId
);

id_type!(
    /// Identifier of a tag.
    ///
    /// Tags themselves live outside this crate; associations only reference them.
    TagId
);

id_type!(
    /// Identifier of a tagged object within its scope.
    ObjectId
);

id_type!(
    /// Identifier of the user who created an association.
    UserId
);
