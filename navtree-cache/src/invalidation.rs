//! Invalidation of cached hierarchies.
//!
//! Changes in the environment (ruleset variables, data store instances, the
//! ruleset itself, the connection) are mapped onto the cached data sources
//! they affect. Affected data sources are deleted together with their nodes
//! and everything below them, and the next request recomputes them.

use crate::error::Result;
use crate::levels::level_from_row;
use crate::store::HierarchyCache;
use navtree_types::{ClassId, CombinedHierarchyLevelIdentifier};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// A change that may make cached hierarchies stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    /// Ruleset variable values changed
    VariablesChanged {
        ruleset_id: String,
        variable_ids: Vec<String>,
    },

    /// Instances of these classes were inserted, updated or deleted
    InstancesChanged {
        connection_id: String,
        class_ids: Vec<ClassId>,
    },

    /// The ruleset was modified
    RulesetChanged { ruleset_id: String },

    /// The connection was reset
    ConnectionChanged { connection_id: String },
}

impl CacheChange {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheChange::VariablesChanged { .. } => "variables",
            CacheChange::InstancesChanged { .. } => "instances",
            CacheChange::RulesetChanged { .. } => "ruleset",
            CacheChange::ConnectionChanged { .. } => "connection",
        }
    }
}

fn json_list<T: serde::Serialize>(values: &[T]) -> Result<String> {
    Ok(serde_json::to_string(values)?)
}

/// Combined levels owning the data sources selected by `data_sources_sql`
fn affected_levels(
    conn: &Connection,
    data_sources_sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<BTreeSet<CombinedHierarchyLevelIdentifier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT hl.id, hl.physical_parent_node_id, hl.virtual_parent_node_id,
                hl.connection_id, hl.ruleset_id, hl.locale, hl.removal_marker
           FROM HierarchyLevels hl
           JOIN DataSources ds ON ds.hierarchy_level_id = hl.id
          WHERE ds.id IN ({data_sources_sql})"
    ))?;
    let levels = stmt
        .query_map(params, |row| Ok(level_from_row(row)?.combined))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(levels)
}

fn invalidate_data_sources(
    conn: &Connection,
    data_sources_sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<BTreeSet<CombinedHierarchyLevelIdentifier>> {
    let levels = affected_levels(conn, data_sources_sql, params)?;
    let removed = conn.execute(
        &format!("DELETE FROM DataSources WHERE id IN ({data_sources_sql})"),
        params,
    )?;
    debug!(removed, levels = levels.len(), "data sources invalidated");
    Ok(levels)
}

fn invalidate_levels(
    conn: &Connection,
    column: &str,
    value: &str,
) -> Result<BTreeSet<CombinedHierarchyLevelIdentifier>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT hl.id, hl.physical_parent_node_id, hl.virtual_parent_node_id,
                hl.connection_id, hl.ruleset_id, hl.locale, hl.removal_marker
           FROM HierarchyLevels hl
          WHERE hl.{column} = ?1"
    ))?;
    let levels = stmt
        .query_map([value], |row| Ok(level_from_row(row)?.combined))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    conn.execute(&format!("DELETE FROM HierarchyLevels WHERE {column} = ?1"), [value])?;
    Ok(levels)
}

impl HierarchyCache {
    /// Drop cached data made stale by `change`.
    ///
    /// Returns the combined levels that lost data, so that callers can
    /// refresh what they display.
    pub fn invalidate(&self, change: &CacheChange) -> Result<Vec<CombinedHierarchyLevelIdentifier>> {
        let levels = self.mutate(|conn| match change {
            CacheChange::VariablesChanged {
                ruleset_id,
                variable_ids,
            } => {
                let ids = json_list(variable_ids)?;
                invalidate_data_sources(
                    conn,
                    "SELECT ds.id FROM DataSources ds
                       JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                      WHERE hl.ruleset_id = ?1
                        AND EXISTS (SELECT 1 FROM DataSourceVariables dsv
                                     WHERE dsv.data_source_id = ds.id
                                       AND dsv.variable_id IN (SELECT value FROM json_each(?2)))",
                    params![ruleset_id, ids],
                )
            }
            CacheChange::InstancesChanged {
                connection_id,
                class_ids,
            } => {
                let ids = json_list(class_ids)?;
                invalidate_data_sources(
                    conn,
                    "SELECT ds.id FROM DataSources ds
                       JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                      WHERE hl.connection_id = ?1
                        AND (EXISTS (SELECT 1 FROM DataSourceClasses dsc
                                      WHERE dsc.data_source_id = ds.id
                                        AND dsc.class_id IN (SELECT value FROM json_each(?2)))
                             OR EXISTS (SELECT 1 FROM Nodes n
                                          JOIN NodeInstances ni ON ni.node_id = n.id
                                         WHERE n.data_source_id = ds.id
                                           AND ni.class_id IN (SELECT value FROM json_each(?2))))",
                    params![connection_id, ids],
                )
            }
            CacheChange::RulesetChanged { ruleset_id } => invalidate_levels(conn, "ruleset_id", ruleset_id),
            CacheChange::ConnectionChanged { connection_id } => {
                invalidate_levels(conn, "connection_id", connection_id)
            }
        })?;
        self.quick.lock().clear();
        info!(change = change.kind(), levels = levels.len(), "hierarchy cache invalidated");
        Ok(levels.into_iter().collect())
    }
}
