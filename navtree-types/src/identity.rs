//! Hierarchy level and data source identities.

use crate::ids::{DataSourceId, HierarchyLevelId, NodeId, RemovalId};
use crate::index::IndexPath;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identity of the set of sibling nodes under one physical parent.
///
/// Several virtual hierarchy levels may share one physical parent (when
/// their virtual parents are invisible), and this identity addresses all of
/// them at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombinedHierarchyLevelIdentifier {
    pub connection_id: String,
    pub ruleset_id: String,
    pub locale: String,
    pub physical_parent: Option<NodeId>,
    #[serde(default)]
    pub removal_id: Option<RemovalId>,
}

impl CombinedHierarchyLevelIdentifier {
    pub fn new(
        connection_id: impl Into<String>,
        ruleset_id: impl Into<String>,
        locale: impl Into<String>,
        physical_parent: Option<NodeId>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            ruleset_id: ruleset_id.into(),
            locale: locale.into(),
            physical_parent,
            removal_id: None,
        }
    }

    pub fn with_removal_id(mut self, removal_id: Option<RemovalId>) -> Self {
        self.removal_id = removal_id;
        self
    }
}

impl Ord for CombinedHierarchyLevelIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.physical_parent
            .cmp(&other.physical_parent)
            .then_with(|| self.ruleset_id.cmp(&other.ruleset_id))
            .then_with(|| self.locale.cmp(&other.locale))
            .then_with(|| self.connection_id.cmp(&other.connection_id))
            .then_with(|| self.removal_id.cmp(&other.removal_id))
    }
}

impl PartialOrd for CombinedHierarchyLevelIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Identity of one hierarchy level: the siblings under one virtual parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HierarchyLevelIdentifier {
    /// Assigned once the level is cached
    pub id: Option<HierarchyLevelId>,
    pub combined: CombinedHierarchyLevelIdentifier,
    pub virtual_parent: Option<NodeId>,
}

impl HierarchyLevelIdentifier {
    pub fn new(combined: CombinedHierarchyLevelIdentifier, virtual_parent: Option<NodeId>) -> Self {
        Self {
            id: None,
            combined,
            virtual_parent,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    pub fn connection_id(&self) -> &str {
        &self.combined.connection_id
    }

    pub fn ruleset_id(&self) -> &str {
        &self.combined.ruleset_id
    }

    pub fn locale(&self) -> &str {
        &self.combined.locale
    }

    pub fn physical_parent(&self) -> Option<NodeId> {
        self.combined.physical_parent
    }

    pub fn removal_id(&self) -> Option<RemovalId> {
        self.combined.removal_id
    }
}

/// Identity of a data source within a hierarchy level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceIdentifier {
    /// Assigned once the data source is cached
    pub id: Option<DataSourceId>,
    pub hierarchy_level: HierarchyLevelId,
    pub index: IndexPath,
}

impl DataSourceIdentifier {
    pub fn new(hierarchy_level: HierarchyLevelId, index: IndexPath) -> Self {
        Self {
            id: None,
            hierarchy_level,
            index,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_identifier_orders_by_parent_first() {
        let a = CombinedHierarchyLevelIdentifier::new("z", "r", "en", None);
        let b = CombinedHierarchyLevelIdentifier::new("a", "r", "en", Some(NodeId(1)));
        assert!(a < b);

        let c = CombinedHierarchyLevelIdentifier::new("a", "r2", "en", Some(NodeId(1)));
        assert!(b < c);
    }
}
