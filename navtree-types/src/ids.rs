//! Numeric identifiers assigned by the hierarchy cache.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }

            /// Value as stored in an SQLite INTEGER column.
            pub fn as_i64(&self) -> i64 {
                self.0 as i64
            }

            pub fn from_i64(id: i64) -> Self {
                Self(id as u64)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a cached node
    NodeId
);
numeric_id!(
    /// Identifier of a cached hierarchy level
    HierarchyLevelId
);
numeric_id!(
    /// Identifier of a cached data source
    DataSourceId
);
numeric_id!(
    /// Identifier of a domain class in the underlying data store
    ClassId
);
numeric_id!(
    /// Identifier of a domain instance in the underlying data store
    InstanceId
);

/// Token identifying a pending removal of a combined hierarchy level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemovalId(pub uuid::Uuid);

impl RemovalId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.hyphenated().to_string()
    }

    pub fn parse(value: &str) -> Option<Self> {
        uuid::Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for RemovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
