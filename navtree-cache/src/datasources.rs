//! Data source lookups, creation and partial updates.

use crate::error::{CacheError, Result};
use crate::levels::{opt_id, removal_param};
use crate::schema::variables_filter;
use crate::store::HierarchyCache;
use navtree_types::{
    ClassId, CombinedHierarchyLevelIdentifier, DataSourceFilter, DataSourceId, DataSourceIdentifier,
    DataSourceInfo, DataSourceParts, HierarchyLevelId, IndexPath, RulesetVariables,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use tracing::{debug, trace};

const DS_COLUMNS: &str = "ds.id, ds.hierarchy_level_id, ds.parent_id, ds.full_index, ds.is_initialized, \
     ds.filter, ds.specification_hash, ds.node_types, ds.is_partial, ds.has_nodes, \
     ds.direct_nodes_count, ds.total_nodes_count, ds.custom_json";

fn data_source_from_row(row: &Row<'_>) -> rusqlite::Result<DataSourceInfo> {
    let full_index: String = row.get(3)?;
    let filter: String = row.get(5)?;
    let custom_json: Option<String> = row.get(12)?;
    let identifier = DataSourceIdentifier {
        id: Some(DataSourceId::from_i64(row.get(0)?)),
        hierarchy_level: HierarchyLevelId::from_i64(row.get(1)?),
        index: IndexPath::parse_sortable(&full_index).unwrap_or_default(),
    };
    let mut info = DataSourceInfo::new(identifier);
    info.parent_id = row.get::<_, Option<i64>>(2)?.map(DataSourceId::from_i64);
    info.is_initialized = row.get(4)?;
    info.filter = DataSourceFilter::from_json_str(&filter).unwrap_or_default();
    info.specification_hash = row.get(6)?;
    info.node_types = row.get(7)?;
    info.is_partial = row.get(8)?;
    info.has_nodes = row.get(9)?;
    info.direct_nodes_count = row.get::<_, Option<i64>>(10)?.map(|n| n as usize);
    info.total_nodes_count = row.get::<_, Option<i64>>(11)?.map(|n| n as usize);
    info.custom_json = custom_json
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();
    Ok(info)
}

/// Load related classes and variables of `info` from their tables
fn load_relations(conn: &Connection, info: &mut DataSourceInfo) -> rusqlite::Result<()> {
    let Some(id) = info.id() else {
        return Ok(());
    };
    let mut stmt = conn.prepare_cached(
        "SELECT class_id, polymorphic FROM DataSourceClasses WHERE data_source_id = ?1",
    )?;
    info.related_classes = stmt
        .query_map([id.as_i64()], |row| {
            Ok((ClassId::from_i64(row.get(0)?), row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT variable_id, last_value FROM DataSourceVariables WHERE data_source_id = ?1",
    )?;
    info.related_variables = stmt
        .query_map([id.as_i64()], |row| {
            let value: String = row.get(1)?;
            Ok((row.get::<_, String>(0)?, serde_json::from_str(&value).unwrap_or_default()))
        })?
        .collect::<rusqlite::Result<RulesetVariables>>()?;
    Ok(())
}

fn collect_data_sources(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<DataSourceInfo>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut infos = stmt
        .query_map(params, data_source_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for info in &mut infos {
        load_relations(conn, info)?;
    }
    Ok(infos)
}

pub(crate) fn get_data_source(conn: &Connection, id: DataSourceId) -> rusqlite::Result<Option<DataSourceInfo>> {
    let info = conn
        .query_row(
            &format!("SELECT {DS_COLUMNS} FROM DataSources ds WHERE ds.id = ?1"),
            [id.as_i64()],
            data_source_from_row,
        )
        .optional()?;
    match info {
        Some(mut info) => {
            load_relations(conn, &mut info)?;
            Ok(Some(info))
        }
        None => Ok(None),
    }
}

fn find_data_source(
    conn: &Connection,
    level: HierarchyLevelId,
    index: &IndexPath,
    variables: &RulesetVariables,
) -> rusqlite::Result<Option<DataSourceInfo>> {
    let info = conn
        .query_row(
            &format!(
                "SELECT {DS_COLUMNS} FROM DataSources ds
                  WHERE ds.hierarchy_level_id = ?1 AND ds.full_index = ?2 AND {}
                  ORDER BY ds.id DESC
                  LIMIT 1",
                variables_filter(3)
            ),
            params![level.as_i64(), index.to_sortable_string(), variables.to_json_string()],
            data_source_from_row,
        )
        .optional()?;
    match info {
        Some(mut info) => {
            load_relations(conn, &mut info)?;
            Ok(Some(info))
        }
        None => Ok(None),
    }
}

fn replace_classes(conn: &Connection, id: DataSourceId, classes: &BTreeMap<ClassId, bool>) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM DataSourceClasses WHERE data_source_id = ?1", [id.as_i64()])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO DataSourceClasses (data_source_id, class_id, polymorphic) VALUES (?1, ?2, ?3)",
    )?;
    for (class, polymorphic) in classes {
        stmt.execute(params![id.as_i64(), class.as_i64(), polymorphic])?;
    }
    Ok(())
}

fn replace_variables(conn: &Connection, id: DataSourceId, variables: &RulesetVariables) -> Result<()> {
    conn.execute("DELETE FROM DataSourceVariables WHERE data_source_id = ?1", [id.as_i64()])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO DataSourceVariables (data_source_id, variable_id, last_value) VALUES (?1, ?2, ?3)",
    )?;
    for (variable, value) in variables.iter() {
        stmt.execute(params![id.as_i64(), variable, serde_json::to_string(value)?])?;
    }
    Ok(())
}

fn opt_count(count: Option<usize>) -> SqlValue {
    count.map_or(SqlValue::Null, |n| SqlValue::Integer(n as i64))
}

fn update_data_source(conn: &Connection, info: &DataSourceInfo, parts: DataSourceParts) -> Result<()> {
    let id = info
        .id()
        .ok_or_else(|| CacheError::invariant("updating a data source that was never cached"))?;

    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    let mut set = |column: &'static str, value: SqlValue| {
        columns.push(column);
        values.push(value);
    };

    let finalizes = (parts.contains(DataSourceParts::HAS_NODES) && info.has_nodes == Some(false))
        || (parts.contains(DataSourceParts::TOTAL_NODES_COUNT) && info.total_nodes_count == Some(0));
    if (parts.contains(DataSourceParts::IS_INITIALIZED) && info.is_initialized) || finalizes {
        set("is_initialized", SqlValue::Integer(1));
    }
    if parts.contains(DataSourceParts::FILTER) {
        set("filter", SqlValue::Text(info.filter.to_json_string()));
    }
    if parts.contains(DataSourceParts::SPECIFICATION_HASH) {
        set("specification_hash", SqlValue::Text(info.specification_hash.clone()));
    }
    if parts.contains(DataSourceParts::NODE_TYPES) {
        set("node_types", SqlValue::Text(info.node_types.clone()));
    }
    if parts.contains(DataSourceParts::IS_PARTIAL) {
        set("is_partial", SqlValue::Integer(info.is_partial as i64));
    }
    if parts.contains(DataSourceParts::PARENT) {
        set("parent_id", info.parent_id.map_or(SqlValue::Null, |p| SqlValue::Integer(p.as_i64())));
    }
    if parts.contains(DataSourceParts::HAS_NODES) {
        set("has_nodes", info.has_nodes.map_or(SqlValue::Null, |b| SqlValue::Integer(b as i64)));
    }
    if parts.contains(DataSourceParts::DIRECT_NODES_COUNT) {
        set("direct_nodes_count", opt_count(info.direct_nodes_count));
    }
    if parts.contains(DataSourceParts::TOTAL_NODES_COUNT) {
        set("total_nodes_count", opt_count(info.total_nodes_count));
    }
    if parts.contains(DataSourceParts::CUSTOM_JSON) {
        set("custom_json", SqlValue::Text(serde_json::to_string(&info.custom_json)?));
    }

    if !columns.is_empty() {
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let mut bound = vec![SqlValue::Integer(id.as_i64())];
        bound.extend(values);
        conn.execute(
            &format!("UPDATE DataSources SET {} WHERE id = ?1", assignments),
            params_from_iter(bound),
        )?;
    }
    if parts.contains(DataSourceParts::RELATED_CLASSES) {
        replace_classes(conn, id, &info.related_classes)?;
    }
    if parts.contains(DataSourceParts::VARIABLES) {
        replace_variables(conn, id, &info.related_variables)?;
    }
    trace!(%id, "data source updated");
    Ok(())
}

impl HierarchyCache {
    /// Data source at `index` of `level` whose variable snapshot matches `variables`
    pub fn find_data_source(
        &self,
        level: HierarchyLevelId,
        index: &IndexPath,
        variables: &RulesetVariables,
    ) -> Option<DataSourceInfo> {
        self.read("find data source", None, |conn| {
            Ok(find_data_source(conn, level, index, variables)?)
        })
    }

    /// Find the data source, creating it from `info` when missing. Idempotent.
    pub fn ensure_data_source(&self, info: &DataSourceInfo, variables: &RulesetVariables) -> Result<DataSourceInfo> {
        let level = info.identifier.hierarchy_level;
        let index = &info.identifier.index;
        self.mutate(|conn| {
            if let Some(existing) = find_data_source(conn, level, index, variables)? {
                return Ok(existing);
            }
            conn.execute(
                "INSERT INTO DataSources (hierarchy_level_id, full_index) VALUES (?1, ?2)",
                params![level.as_i64(), index.to_sortable_string()],
            )?;
            let id = DataSourceId::from_i64(conn.last_insert_rowid());
            let mut created = info.clone();
            created.identifier.id = Some(id);
            let initialized = created.is_initialized;
            created.is_initialized = false;
            update_data_source(conn, &created, DataSourceParts::ALL)?;
            if initialized {
                conn.execute("UPDATE DataSources SET is_initialized = 1 WHERE id = ?1", [id.as_i64()])?;
            }
            debug!(%id, %level, index = %index, "data source created");
            Ok(get_data_source(conn, id)?.unwrap_or(created))
        })
    }

    pub fn get_data_source(&self, id: DataSourceId) -> Option<DataSourceInfo> {
        self.read("get data source", None, |conn| Ok(get_data_source(conn, id)?))
    }

    /// Write the fields selected by `parts`.
    ///
    /// The initialized flag only ever goes from false to true here; setting
    /// `has_nodes = false` or `total_nodes_count = 0` finalizes as well.
    pub fn update_data_source(&self, info: &DataSourceInfo, parts: DataSourceParts) -> Result<()> {
        self.mutate(|conn| update_data_source(conn, info, parts))
    }

    /// Mark the data source as fully computed. Idempotent.
    pub fn finalize_initialization(&self, id: DataSourceId) -> Result<()> {
        let changed = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE DataSources SET is_initialized = 1 WHERE id = ?1 AND NOT is_initialized",
                [id.as_i64()],
            )?)
        })?;
        if changed > 0 {
            debug!(%id, "data source finalized");
        }
        Ok(())
    }

    pub fn is_data_source_initialized(&self, id: DataSourceId) -> bool {
        self.read("data source initialization query", false, |conn| {
            Ok(conn
                .query_row(
                    "SELECT is_initialized FROM DataSources WHERE id = ?1",
                    [id.as_i64()],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(false))
        })
    }

    /// Data sources of one level matching `variables`, in index order
    pub fn data_sources(&self, level: HierarchyLevelId, variables: &RulesetVariables) -> Vec<DataSourceInfo> {
        self.read("list data sources", Vec::new(), |conn| {
            Ok(collect_data_sources(
                conn,
                &format!(
                    "SELECT {DS_COLUMNS} FROM DataSources ds
                      WHERE ds.hierarchy_level_id = ?1 AND {}
                      ORDER BY ds.full_index",
                    variables_filter(2)
                ),
                params![level.as_i64(), variables.to_json_string()],
            )?)
        })
    }

    /// Data sources of every level under the physical parent, in index order
    pub fn combined_data_sources(
        &self,
        combined: &CombinedHierarchyLevelIdentifier,
        variables: &RulesetVariables,
    ) -> Vec<DataSourceInfo> {
        self.read("list combined data sources", Vec::new(), |conn| {
            Ok(collect_data_sources(
                conn,
                &format!(
                    "SELECT {DS_COLUMNS} FROM DataSources ds
                       JOIN HierarchyLevels hl ON hl.id = ds.hierarchy_level_id
                      WHERE hl.physical_parent_node_id IS ?1 AND hl.connection_id = ?2
                        AND hl.ruleset_id = ?3 AND hl.locale = ?4 AND hl.removal_marker IS ?5
                        AND {}
                      ORDER BY ds.full_index",
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
            )?)
        })
    }

    /// Partial data sources created on behalf of `parent`, in index order
    pub fn child_data_sources(&self, parent: DataSourceId) -> Vec<DataSourceInfo> {
        self.read("list child data sources", Vec::new(), |conn| {
            Ok(collect_data_sources(
                conn,
                &format!(
                    "SELECT {DS_COLUMNS} FROM DataSources ds
                      WHERE ds.parent_id = ?1
                      ORDER BY ds.full_index"
                ),
                [parent.as_i64()],
            )?)
        })
    }
}
