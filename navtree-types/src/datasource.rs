//! Data source metadata.

use crate::identity::DataSourceIdentifier;
use crate::ids::{ClassId, DataSourceId};
use crate::node::InstanceKey;
use crate::variables::RulesetVariables;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

/// Restricts a data source to instances related to a given set of instances
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFilter {
    pub relationship_classes: Vec<ClassId>,
    /// True when following relationships from source to target
    pub forward: bool,
    pub instances: Vec<InstanceKey>,
}

/// Filter applied by a data source, persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<RelationshipFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_filter: Option<String>,
}

impl DataSourceFilter {
    pub fn is_empty(&self) -> bool {
        self.relationship.is_none() && self.instance_filter.is_none()
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_str(value: &str) -> Option<Self> {
        if value.is_empty() {
            return Some(Self::default());
        }
        serde_json::from_str(value).ok()
    }
}

/// Selects which fields of a [`DataSourceInfo`] an update touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataSourceParts(u32);

impl DataSourceParts {
    pub const NONE: Self = Self(0);
    pub const IS_INITIALIZED: Self = Self(1 << 0);
    pub const FILTER: Self = Self(1 << 1);
    pub const RELATED_CLASSES: Self = Self(1 << 2);
    pub const VARIABLES: Self = Self(1 << 3);
    pub const SPECIFICATION_HASH: Self = Self(1 << 4);
    pub const NODE_TYPES: Self = Self(1 << 5);
    pub const IS_PARTIAL: Self = Self(1 << 6);
    pub const PARENT: Self = Self(1 << 7);
    pub const HAS_NODES: Self = Self(1 << 8);
    pub const DIRECT_NODES_COUNT: Self = Self(1 << 9);
    pub const TOTAL_NODES_COUNT: Self = Self(1 << 10);
    pub const CUSTOM_JSON: Self = Self(1 << 11);
    pub const ALL: Self = Self((1 << 12) - 1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for DataSourceParts {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DataSourceParts {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Everything the cache knows about one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub identifier: DataSourceIdentifier,
    pub parent_id: Option<DataSourceId>,
    pub filter: DataSourceFilter,
    /// Classes whose instance changes invalidate this data source, with
    /// their polymorphic flag
    pub related_classes: BTreeMap<ClassId, bool>,
    /// Snapshot of variable values the data source was computed with
    pub related_variables: RulesetVariables,
    pub specification_hash: String,
    pub node_types: String,
    pub is_partial: bool,
    pub is_initialized: bool,
    pub has_nodes: Option<bool>,
    pub direct_nodes_count: Option<usize>,
    pub total_nodes_count: Option<usize>,
    pub custom_json: serde_json::Value,
}

impl DataSourceInfo {
    pub fn new(identifier: DataSourceIdentifier) -> Self {
        Self {
            identifier,
            parent_id: None,
            filter: DataSourceFilter::default(),
            related_classes: BTreeMap::new(),
            related_variables: RulesetVariables::new(),
            specification_hash: String::new(),
            node_types: String::new(),
            is_partial: false,
            is_initialized: false,
            has_nodes: None,
            direct_nodes_count: None,
            total_nodes_count: None,
            custom_json: serde_json::Value::Null,
        }
    }

    pub fn id(&self) -> Option<DataSourceId> {
        self.identifier.id
    }

    pub fn with_variables(mut self, variables: RulesetVariables) -> Self {
        self.related_variables = variables;
        self
    }

    pub fn with_specification(mut self, hash: impl Into<String>, node_types: impl Into<String>) -> Self {
        self.specification_hash = hash.into();
        self.node_types = node_types.into();
        self
    }
}
