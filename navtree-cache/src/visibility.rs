//! Node visibility transitions.
//!
//! A hierarchy level's physical parent is the nearest visible ancestor of its
//! nodes. Turning a node virtual hands the levels it was the physical parent
//! of over to its own physical parent; turning it back walks the chain of
//! virtual nodes below it and reclaims every level on the way.

use crate::error::{CacheError, Result};
use crate::store::HierarchyCache;
use navtree_types::{NodeId, NodeVisibility};
use rusqlite::{params, Connection};
use tracing::debug;

fn set_visibility(conn: &Connection, node: NodeId, visibility: NodeVisibility) -> Result<()> {
    let changed = conn.execute(
        "UPDATE Nodes SET visibility = ?2 WHERE id = ?1",
        params![node.as_i64(), visibility.as_i32()],
    )?;
    if changed == 0 {
        return Err(CacheError::invariant(format!(
            "changing visibility of unknown node {}",
            node
        )));
    }
    Ok(())
}

impl HierarchyCache {
    /// Hide the node but show its children in its place
    pub fn make_virtual(&self, node: NodeId) -> Result<()> {
        let reparented = self.mutate(|conn| {
            set_visibility(conn, node, NodeVisibility::Virtual)?;
            Ok(conn.execute(
                "UPDATE HierarchyLevels
                    SET physical_parent_node_id = (
                        SELECT hl.physical_parent_node_id
                          FROM Nodes n
                          JOIN DataSources ds ON ds.id = n.data_source_id
                          JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                         WHERE n.id = ?1)
                  WHERE physical_parent_node_id = ?1",
                [node.as_i64()],
            )?)
        })?;
        self.quick.lock().clear();
        debug!(%node, reparented, "node made virtual");
        Ok(())
    }

    /// Show the node again and make it the physical parent of every level
    /// reachable through virtual nodes below it
    pub fn make_physical(&self, node: NodeId) -> Result<()> {
        let reparented = self.mutate(|conn| {
            set_visibility(conn, node, NodeVisibility::Visible)?;
            Ok(conn.execute(
                "WITH RECURSIVE closure(level_id) AS (
                     SELECT id FROM HierarchyLevels WHERE virtual_parent_node_id = ?1
                     UNION
                     SELECT hl.id
                       FROM closure c
                       JOIN DataSources ds ON ds.hierarchy_level_id = c.level_id
                       JOIN Nodes n ON n.data_source_id = ds.id AND n.visibility = ?2
                       JOIN HierarchyLevels hl ON hl.virtual_parent_node_id = n.id
                 )
                 UPDATE HierarchyLevels
                    SET physical_parent_node_id = ?1
                  WHERE id IN (SELECT level_id FROM closure)",
                params![node.as_i64(), NodeVisibility::Virtual.as_i32()],
            )?)
        })?;
        self.quick.lock().clear();
        debug!(%node, reparented, "node made physical");
        Ok(())
    }

    /// Hide the node together with its whole subtree
    pub fn make_hidden(&self, node: NodeId) -> Result<()> {
        self.with_conn(|conn| set_visibility(conn, node, NodeVisibility::Hidden))?;
        let mut quick = self.quick.lock();
        quick.remove_node(node);
        quick.clear_providers();
        debug!(%node, "node hidden");
        Ok(())
    }
}
