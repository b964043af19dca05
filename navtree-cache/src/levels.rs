//! Hierarchy level lookups and creation.

use crate::error::Result;
use crate::schema::variables_filter;
use crate::store::{ensure_owner_rows, HierarchyCache};
use navtree_types::{
    CombinedHierarchyLevelIdentifier, HierarchyLevelId, HierarchyLevelIdentifier, NodeId,
    NodeVisibility, RemovalId, RulesetVariables,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

const LEVEL_COLUMNS: &str = "hl.id, hl.physical_parent_node_id, hl.virtual_parent_node_id, \
     hl.connection_id, hl.ruleset_id, hl.locale, hl.removal_marker";

pub(crate) fn level_from_row(row: &Row<'_>) -> rusqlite::Result<HierarchyLevelIdentifier> {
    let removal: Option<String> = row.get(6)?;
    let combined = CombinedHierarchyLevelIdentifier::new(
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, String>(5)?,
        row.get::<_, Option<i64>>(1)?.map(NodeId::from_i64),
    )
    .with_removal_id(removal.as_deref().and_then(RemovalId::parse));
    Ok(HierarchyLevelIdentifier {
        id: Some(HierarchyLevelId::from_i64(row.get(0)?)),
        combined,
        virtual_parent: row.get::<_, Option<i64>>(2)?.map(NodeId::from_i64),
    })
}

pub(crate) fn opt_id(id: Option<NodeId>) -> Option<i64> {
    id.map(|id| id.as_i64())
}

pub(crate) fn removal_param(id: Option<RemovalId>) -> Option<String> {
    id.map(|id| id.as_str())
}

fn find_level(
    conn: &Connection,
    combined: &CombinedHierarchyLevelIdentifier,
    virtual_parent: Option<NodeId>,
) -> rusqlite::Result<Option<HierarchyLevelIdentifier>> {
    conn.query_row(
        &format!(
            "SELECT {LEVEL_COLUMNS} FROM HierarchyLevels hl
              WHERE hl.virtual_parent_node_id IS ?1 AND hl.connection_id = ?2
                AND hl.ruleset_id = ?3 AND hl.locale = ?4 AND hl.removal_marker IS ?5"
        ),
        params![
            opt_id(virtual_parent),
            combined.connection_id,
            combined.ruleset_id,
            combined.locale,
            removal_param(combined.removal_id),
        ],
        level_from_row,
    )
    .optional()
}

/// Hierarchy level with all columns, plus its data source and node counts
#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub identifier: HierarchyLevelIdentifier,
    pub data_sources: u64,
    pub initialized_data_sources: u64,
    pub nodes: u64,
}

impl HierarchyCache {
    /// The level under `virtual_parent` for the combined identity's
    /// connection, ruleset, locale and removal marker
    pub fn find_hierarchy_level(
        &self,
        combined: &CombinedHierarchyLevelIdentifier,
        virtual_parent: Option<NodeId>,
    ) -> Option<HierarchyLevelIdentifier> {
        self.read("find hierarchy level", None, |conn| {
            Ok(find_level(conn, combined, virtual_parent)?)
        })
    }

    /// Find the level, creating an empty one when missing. Idempotent.
    pub fn ensure_hierarchy_level(
        &self,
        identifier: &HierarchyLevelIdentifier,
    ) -> Result<HierarchyLevelIdentifier> {
        self.mutate(|conn| {
            if let Some(existing) = find_level(conn, &identifier.combined, identifier.virtual_parent)? {
                return Ok(existing);
            }
            let combined = &identifier.combined;
            ensure_owner_rows(conn, &combined.connection_id, &combined.ruleset_id)?;
            conn.execute(
                "INSERT INTO HierarchyLevels
                     (physical_parent_node_id, virtual_parent_node_id, connection_id, ruleset_id, locale, removal_marker)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    opt_id(combined.physical_parent),
                    opt_id(identifier.virtual_parent),
                    combined.connection_id,
                    combined.ruleset_id,
                    combined.locale,
                    removal_param(combined.removal_id),
                ],
            )?;
            let id = HierarchyLevelId::from_i64(conn.last_insert_rowid());
            debug!(%id, virtual_parent = ?identifier.virtual_parent, "hierarchy level created");
            Ok(HierarchyLevelIdentifier {
                id: Some(id),
                ..identifier.clone()
            })
        })
    }

    pub fn get_hierarchy_level(&self, id: HierarchyLevelId) -> Option<HierarchyLevelIdentifier> {
        self.read("get hierarchy level", None, |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {LEVEL_COLUMNS} FROM HierarchyLevels hl WHERE hl.id = ?1"),
                    [id.as_i64()],
                    level_from_row,
                )
                .optional()?)
        })
    }

    /// All levels sharing the combined identity's physical parent
    pub fn hierarchy_levels(&self, combined: &CombinedHierarchyLevelIdentifier) -> Vec<HierarchyLevelIdentifier> {
        self.read("list combined levels", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {LEVEL_COLUMNS} FROM HierarchyLevels hl
                  WHERE hl.physical_parent_node_id IS ?1 AND hl.connection_id = ?2
                    AND hl.ruleset_id = ?3 AND hl.locale = ?4 AND hl.removal_marker IS ?5
                  ORDER BY hl.id"
            ))?;
            let levels = stmt
                .query_map(
                    params![
                        opt_id(combined.physical_parent),
                        combined.connection_id,
                        combined.ruleset_id,
                        combined.locale,
                        removal_param(combined.removal_id),
                    ],
                    level_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(levels)
        })
    }

    /// True when the level has data sources matching `variables` and all of them are initialized
    pub fn is_level_initialized(&self, level: HierarchyLevelId, variables: &RulesetVariables) -> bool {
        self.read("level initialization query", false, |conn| {
            let (total, pending): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(NOT ds.is_initialized), 0)
                       FROM DataSources ds
                      WHERE ds.hierarchy_level_id = ?1 AND {}",
                    variables_filter(2)
                ),
                params![level.as_i64(), variables.to_json_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(total > 0 && pending == 0)
        })
    }

    /// Whether any node of the level is virtual
    pub fn has_virtual_nodes(&self, level: HierarchyLevelId) -> bool {
        self.read("virtual nodes query", false, |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM Nodes n
                                  JOIN DataSources ds ON ds.id = n.data_source_id
                                 WHERE ds.hierarchy_level_id = ?1 AND n.visibility = ?2)",
                params![level.as_i64(), NodeVisibility::Virtual.as_i32()],
                |row| row.get(0),
            )?)
        })
    }

    /// True when every data source of every level under the physical parent is initialized
    pub fn is_combined_level_initialized(
        &self,
        combined: &CombinedHierarchyLevelIdentifier,
        variables: &RulesetVariables,
    ) -> bool {
        self.read("combined level initialization query", false, |conn| {
            let (total, pending): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(NOT ds.is_initialized), 0)
                       FROM HierarchyLevels hl
                       JOIN DataSources ds ON ds.hierarchy_level_id = hl.id
                      WHERE hl.physical_parent_node_id IS ?1 AND hl.connection_id = ?2
                        AND hl.ruleset_id = ?3 AND hl.locale = ?4 AND hl.removal_marker IS ?5
                        AND {}",
                    variables_filter(6)
                ),
                params![
                    opt_id(combined.physical_parent),
                    combined.connection_id,
                    combined.ruleset_id,
                    combined.locale,
                    removal_param(combined.removal_id),
                    variables.to_json_string(),
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(total > 0 && pending == 0)
        })
    }

    /// Every cached level, optionally restricted to one connection
    pub fn list_levels(&self, connection_id: Option<&str>) -> Vec<LevelSummary> {
        self.read("list levels", Vec::new(), |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LEVEL_COLUMNS},
                        (SELECT COUNT(*) FROM DataSources ds WHERE ds.hierarchy_level_id = hl.id),
                        (SELECT COUNT(*) FROM DataSources ds WHERE ds.hierarchy_level_id = hl.id AND ds.is_initialized),
                        (SELECT COUNT(*) FROM DataSources ds JOIN Nodes n ON n.data_source_id = ds.id
                          WHERE ds.hierarchy_level_id = hl.id)
                   FROM HierarchyLevels hl
                  WHERE ?1 IS NULL OR hl.connection_id = ?1
                  ORDER BY hl.id"
            ))?;
            let levels = stmt
                .query_map([connection_id], |row| {
                    Ok(LevelSummary {
                        identifier: level_from_row(row)?,
                        data_sources: row.get::<_, i64>(7)? as u64,
                        initialized_data_sources: row.get::<_, i64>(8)? as u64,
                        nodes: row.get::<_, i64>(9)? as u64,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(levels)
        })
    }
}
