//! Navigation nodes and their structural keys.

use crate::ids::{ClassId, InstanceId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Shared handle to an immutable node
pub type NodeRef = Arc<NavNode>;

/// Kind of node produced by a specification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Instances,
    ClassGrouping,
    PropertyGrouping,
    DisplayLabelGrouping,
    Custom(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Instances => "instances",
            NodeType::ClassGrouping => "class-grouping",
            NodeType::PropertyGrouping => "property-grouping",
            NodeType::DisplayLabelGrouping => "label-grouping",
            NodeType::Custom(name) => name,
        }
    }

    pub fn is_grouping(&self) -> bool {
        matches!(
            self,
            NodeType::ClassGrouping | NodeType::PropertyGrouping | NodeType::DisplayLabelGrouping
        )
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "instances" => NodeType::Instances,
            "class-grouping" => NodeType::ClassGrouping,
            "property-grouping" => NodeType::PropertyGrouping,
            "label-grouping" => NodeType::DisplayLabelGrouping,
            _ => NodeType::Custom(value),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node visibility as persisted in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeVisibility {
    /// Shown
    Visible,
    /// Not shown, its children are shown in its place
    Virtual,
    /// Not shown together with its whole subtree
    Hidden,
}

impl NodeVisibility {
    pub fn as_i32(self) -> i32 {
        match self {
            NodeVisibility::Visible => 0,
            NodeVisibility::Virtual => 1,
            NodeVisibility::Hidden => 2,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(NodeVisibility::Visible),
            1 => Some(NodeVisibility::Virtual),
            2 => Some(NodeVisibility::Hidden),
            _ => None,
        }
    }
}

/// Whether a specification already knows if its nodes have children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChildrenHint {
    #[default]
    Unknown,
    Always,
    Never,
}

/// Key of a domain instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub class_id: ClassId,
    pub instance_id: InstanceId,
}

impl InstanceKey {
    pub fn new(class_id: impl Into<ClassId>, instance_id: impl Into<InstanceId>) -> Self {
        Self {
            class_id: class_id.into(),
            instance_id: instance_id.into(),
        }
    }
}

/// Structural key of a node.
///
/// The hash path holds one hash per ancestor plus the node's own hash last,
/// which allows re-locating a node after the cache is rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKey {
    pub node_type: NodeType,
    pub specification_identifier: String,
    pub hash_path: Vec<String>,
    #[serde(default)]
    pub instance_keys: Vec<InstanceKey>,
    /// Number of grouped instances for grouping nodes
    #[serde(default)]
    pub grouped_instances_count: Option<u64>,
}

impl NodeKey {
    /// Build a key below `parent` with a hash over the node's identifying parts
    pub fn create(
        node_type: NodeType,
        specification_identifier: impl Into<String>,
        connection_id: &str,
        parent: Option<&NodeKey>,
        discriminators: &[String],
        instance_keys: Vec<InstanceKey>,
    ) -> Self {
        let specification_identifier = specification_identifier.into();
        let mut hasher = blake3::Hasher::new();
        hasher.update(node_type.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(specification_identifier.as_bytes());
        hasher.update(&[0]);
        hasher.update(connection_id.as_bytes());
        for discriminator in discriminators {
            hasher.update(&[0]);
            hasher.update(discriminator.as_bytes());
        }
        for key in &instance_keys {
            hasher.update(&key.class_id.as_u64().to_le_bytes());
            hasher.update(&key.instance_id.as_u64().to_le_bytes());
        }
        let own_hash = hasher.finalize().to_hex()[..32].to_string();

        let mut hash_path = parent.map(|p| p.hash_path.clone()).unwrap_or_default();
        hash_path.push(own_hash);
        Self {
            node_type,
            specification_identifier,
            hash_path,
            instance_keys,
            grouped_instances_count: None,
        }
    }

    /// The node's own hash
    pub fn hash(&self) -> &str {
        self.hash_path.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_grouping(&self) -> bool {
        self.node_type.is_grouping()
    }

    pub fn is_instances(&self) -> bool {
        self.node_type == NodeType::Instances
    }
}

/// Presentation flags carried by a node from the specification that created it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeExtendedData {
    pub ruleset_id: String,
    pub hide_nodes_in_hierarchy: bool,
    pub hide_if_no_children: bool,
    pub hide_if_only_one_child: bool,
    pub hide_if_grouping_value_not_specified: bool,
    pub hide_expression: Option<String>,
    pub children_hint: ChildrenHint,
    pub allowed_similar_ancestors: u32,
    /// Grouped values of a property grouping node
    pub property_values: Vec<Value>,
    pub virtual_parent_ids: Vec<NodeId>,
    pub merged_node_ids: Vec<NodeId>,
    /// Set once the node's visibility decision has been made
    pub is_node_initialized: bool,
}

impl NodeExtendedData {
    /// True when all grouped property values are null or empty strings
    pub fn grouping_value_unspecified(&self) -> bool {
        self.property_values.iter().all(|value| match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        })
    }
}

/// A node of a navigation hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavNode {
    /// Assigned when the node is cached
    pub id: Option<NodeId>,
    pub key: NodeKey,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Last visible ancestor
    #[serde(default)]
    pub physical_parent: Option<NodeId>,
    /// `None` until determined
    #[serde(default)]
    pub has_children: Option<bool>,
    #[serde(default)]
    pub extended: NodeExtendedData,
    #[serde(default)]
    pub payload: Value,
}

impl NavNode {
    pub fn new(key: NodeKey, label: impl Into<String>) -> Self {
        Self {
            id: None,
            key,
            label: label.into(),
            description: String::new(),
            physical_parent: None,
            has_children: None,
            extended: NodeExtendedData::default(),
            payload: Value::Null,
        }
    }

    pub fn node_type(&self) -> &NodeType {
        &self.key.node_type
    }

    pub fn determined_children(&self) -> bool {
        self.has_children.is_some()
    }

    /// Immediate logical parent
    pub fn virtual_parent(&self) -> Option<NodeId> {
        self.extended.virtual_parent_ids.first().copied()
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json_str(value: &str) -> serde_json::Result<Self> {
        serde_json::from_str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_path_extends_parent() {
        let parent = NodeKey::create(NodeType::Custom("T".into()), "spec", "c1", None, &["root".into()], vec![]);
        let child = NodeKey::create(
            NodeType::Instances,
            "spec2",
            "c1",
            Some(&parent),
            &[],
            vec![InstanceKey::new(1, 7)],
        );
        assert_eq!(child.hash_path.len(), 2);
        assert_eq!(child.hash_path[0], parent.hash());
        assert_ne!(child.hash(), parent.hash());
    }

    #[test]
    fn test_same_inputs_give_same_hash() {
        let a = NodeKey::create(NodeType::Instances, "s", "c", None, &[], vec![InstanceKey::new(1, 2)]);
        let b = NodeKey::create(NodeType::Instances, "s", "c", None, &[], vec![InstanceKey::new(1, 2)]);
        let c = NodeKey::create(NodeType::Instances, "s", "c", None, &[], vec![InstanceKey::new(1, 3)]);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_node_type_string_round_trip() {
        for ty in [
            NodeType::Instances,
            NodeType::ClassGrouping,
            NodeType::PropertyGrouping,
            NodeType::DisplayLabelGrouping,
            NodeType::Custom("Folder".into()),
        ] {
            assert_eq!(NodeType::from(String::from(ty.clone())), ty);
        }
    }

    #[test]
    fn test_grouping_value_unspecified() {
        let mut ext = NodeExtendedData::default();
        ext.property_values = vec![Value::Null, Value::String(String::new())];
        assert!(ext.grouping_value_unspecified());
        ext.property_values.push(Value::from(3));
        assert!(!ext.grouping_value_unspecified());
    }

    #[test]
    fn test_node_json_round_trip() {
        let key = NodeKey::create(NodeType::Instances, "s", "c", None, &[], vec![InstanceKey::new(4, 5)]);
        let mut node = NavNode::new(key, "Item 1");
        node.extended.virtual_parent_ids = vec![NodeId(3)];
        let parsed = NavNode::from_json_str(&node.to_json_string().unwrap()).unwrap();
        assert_eq!(parsed, node);
        assert_eq!(parsed.virtual_parent(), Some(NodeId(3)));
    }
}
