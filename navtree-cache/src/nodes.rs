//! Node caching, partial updates and lookups.

use crate::error::{CacheError, Result};
use crate::levels::level_from_row;
use crate::store::HierarchyCache;
use navtree_types::{
    DataSourceId, HierarchyLevelIdentifier, IndexPath, NavNode, NodeId, NodeKey, NodeRef,
    NodeVisibility,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{debug, trace};

/// Columns producing a node via [`node_from_row`]; requires aliases `n`, `ds` and `hl`
pub(crate) const NODE_COLUMNS: &str = "n.id, n.payload, hl.physical_parent_node_id";

/// Joins from `Nodes n` to its data source and hierarchy level
pub(crate) const NODE_JOINS: &str = "JOIN DataSources ds ON ds.id = n.data_source_id \
     JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id";

/// Separator of persisted key hash paths
const KEY_PATH_SEPARATOR: &str = "/";

pub(crate) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<NodeRef> {
    let payload: String = row.get(1)?;
    let mut node = NavNode::from_json_str(&payload)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?;
    node.id = Some(NodeId::from_i64(row.get(0)?));
    node.physical_parent = row.get::<_, Option<i64>>(2)?.map(NodeId::from_i64);
    Ok(Arc::new(node))
}

/// Selects which parts of a node [`HierarchyCache::update_node`] writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeParts(u8);

impl NodeParts {
    /// Serialized node and label
    pub const PAYLOAD: Self = Self(1);
    /// Structural key and instance keys
    pub const KEY: Self = Self(1 << 1);
    /// Move the row to the node's own id
    pub const IDENTITY: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NodeParts {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

fn payload_of(node: &NavNode) -> Result<String> {
    let mut stored = node.clone();
    stored.id = None;
    stored.physical_parent = None;
    Ok(stored.to_json_string()?)
}

fn write_key(conn: &Connection, id: NodeId, key: &NodeKey) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO NodeKeys (node_id, type, specification_identifier, path_from_root)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id.as_i64(),
            key.node_type.as_str(),
            key.specification_identifier,
            key.hash_path.join(KEY_PATH_SEPARATOR),
        ],
    )?;
    conn.execute("DELETE FROM NodeInstances WHERE node_id = ?1", [id.as_i64()])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO NodeInstances (node_id, class_id, instance_id, is_directly_related)
         VALUES (?1, ?2, ?3, 1)",
    )?;
    for instance in &key.instance_keys {
        stmt.execute(params![
            id.as_i64(),
            instance.class_id.as_i64(),
            instance.instance_id.as_i64()
        ])?;
    }
    Ok(())
}

fn load_node(conn: &Connection, id: NodeId) -> rusqlite::Result<Option<NodeRef>> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM Nodes n {NODE_JOINS} WHERE n.id = ?1"),
        [id.as_i64()],
        node_from_row,
    )
    .optional()
}

impl HierarchyCache {
    /// Insert `node` into a data source at `local_index`.
    ///
    /// The node's full order value is derived by the store from the data
    /// source's index. The structural key and instance keys are recorded for
    /// later lookups and invalidation. Returns the node with its new id.
    pub fn cache_node(
        &self,
        data_source: DataSourceId,
        node: &NavNode,
        local_index: &IndexPath,
        visibility: NodeVisibility,
    ) -> Result<NodeRef> {
        let payload = payload_of(node)?;
        let cached = self.mutate(|conn| {
            let physical_parent: Option<Option<i64>> = conn
                .query_row(
                    "SELECT hl.physical_parent_node_id FROM DataSources ds
                       JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                      WHERE ds.id = ?1",
                    [data_source.as_i64()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(physical_parent) = physical_parent else {
                return Err(CacheError::invariant(format!(
                    "caching a node into unknown data source {}",
                    data_source
                )));
            };
            conn.execute(
                "INSERT INTO Nodes (data_source_id, local_index, visibility, payload, label)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    data_source.as_i64(),
                    local_index.to_sortable_string(),
                    visibility.as_i32(),
                    payload,
                    node.label,
                ],
            )?;
            let id = NodeId::from_i64(conn.last_insert_rowid());
            write_key(conn, id, &node.key)?;

            let mut cached = node.clone();
            cached.id = Some(id);
            cached.physical_parent = physical_parent.map(NodeId::from_i64);
            Ok(Arc::new(cached))
        })?;
        trace!(id = ?cached.id, label = %cached.label, "node cached");
        self.quick.lock().put_node(Arc::clone(&cached));
        Ok(cached)
    }

    /// Rewrite the parts of node `id` selected by `parts`.
    ///
    /// With [`NodeParts::IDENTITY`] the row (and everything referencing it)
    /// moves to `node.id`.
    pub fn update_node(&self, id: NodeId, node: &NavNode, parts: NodeParts) -> Result<()> {
        let payload = payload_of(node)?;
        self.mutate(|conn| {
            let mut current = id;
            if parts.contains(NodeParts::IDENTITY) {
                if let Some(new_id) = node.id.filter(|new_id| *new_id != id) {
                    conn.execute(
                        "UPDATE Nodes SET id = ?2 WHERE id = ?1",
                        params![id.as_i64(), new_id.as_i64()],
                    )?;
                    conn.execute(
                        "UPDATE HierarchyLevels SET physical_parent_node_id = ?2 WHERE physical_parent_node_id = ?1",
                        params![id.as_i64(), new_id.as_i64()],
                    )?;
                    debug!(from = %id, to = %new_id, "node identity changed");
                    current = new_id;
                }
            }
            if parts.contains(NodeParts::PAYLOAD) {
                let changed = conn.execute(
                    "UPDATE Nodes SET payload = ?2, label = ?3 WHERE id = ?1",
                    params![current.as_i64(), payload, node.label],
                )?;
                if changed == 0 {
                    return Err(CacheError::invariant(format!("updating unknown node {}", current)));
                }
            }
            if parts.contains(NodeParts::KEY) {
                write_key(conn, current, &node.key)?;
            }
            Ok(())
        })?;
        let mut quick = self.quick.lock();
        quick.remove_node(id);
        if let Some(new_id) = node.id {
            quick.remove_node(new_id);
        }
        Ok(())
    }

    /// Node by id, served from the quick cache when possible
    pub fn get_node(&self, id: NodeId) -> Option<NodeRef> {
        if let Some(node) = self.quick_node(id) {
            return Some(node);
        }
        let node = self.read("get node", None, |conn| Ok(load_node(conn, id)?))?;
        self.quick.lock().put_node(Arc::clone(&node));
        Some(node)
    }

    pub fn node_visibility(&self, id: NodeId) -> Option<NodeVisibility> {
        self.read("node visibility", None, |conn| {
            let value: Option<i32> = conn
                .query_row("SELECT visibility FROM Nodes WHERE id = ?1", [id.as_i64()], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value.and_then(NodeVisibility::from_i32))
        })
    }

    /// Full order path of the node within its hierarchy level
    pub fn node_index(&self, id: NodeId) -> Option<IndexPath> {
        self.read("node index", None, |conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT order_value FROM NodesOrder WHERE node_id = ?1",
                    [id.as_i64()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.and_then(|value| IndexPath::parse_sortable(&value)))
        })
    }

    /// Nearest visible ancestor of the node
    pub fn physical_parent_id(&self, id: NodeId) -> Option<NodeId> {
        self.read("physical parent", None, |conn| {
            let value: Option<Option<i64>> = conn
                .query_row(
                    &format!("SELECT hl.physical_parent_node_id FROM Nodes n {NODE_JOINS} WHERE n.id = ?1"),
                    [id.as_i64()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.flatten().map(NodeId::from_i64))
        })
    }

    pub fn node_data_source(&self, id: NodeId) -> Option<DataSourceId> {
        self.read("node data source", None, |conn| {
            Ok(conn
                .query_row("SELECT data_source_id FROM Nodes WHERE id = ?1", [id.as_i64()], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?
                .map(DataSourceId::from_i64))
        })
    }

    /// Hierarchy level the node belongs to
    pub fn node_hierarchy_level(&self, id: NodeId) -> Option<HierarchyLevelIdentifier> {
        self.read("node hierarchy level", None, |conn| {
            Ok(conn
                .query_row(
                    "SELECT hl.id, hl.physical_parent_node_id, hl.virtual_parent_node_id,
                            hl.connection_id, hl.ruleset_id, hl.locale, hl.removal_marker
                       FROM Nodes n
                       JOIN DataSources ds ON ds.id = n.data_source_id
                       JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                      WHERE n.id = ?1",
                    [id.as_i64()],
                    level_from_row,
                )
                .optional()?)
        })
    }

    /// Re-locate a node by its structural key hash path
    pub fn find_node_by_key_path(
        &self,
        connection_id: &str,
        ruleset_id: &str,
        locale: &str,
        hash_path: &[String],
    ) -> Option<NodeRef> {
        self.read("find node by key", None, |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {NODE_COLUMNS} FROM Nodes n {NODE_JOINS}
                           JOIN NodeKeys nk ON nk.node_id = n.id
                          WHERE nk.path_from_root = ?1 AND hl.connection_id = ?2
                            AND hl.ruleset_id = ?3 AND hl.locale = ?4 AND hl.removal_marker IS NULL
                          ORDER BY n.id DESC
                          LIMIT 1"
                    ),
                    params![hash_path.join(KEY_PATH_SEPARATOR), connection_id, ruleset_id, locale],
                    node_from_row,
                )
                .optional()?)
        })
    }
}
