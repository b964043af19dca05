//! Persistent schema, version stamping and custom SQL functions.

use crate::error::Result;
use navtree_types::RulesetVariables;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};

/// Bumped when existing stores can no longer be read
pub const CACHE_VERSION_MAJOR: u32 = 1;
/// Bumped for compatible schema additions
pub const CACHE_VERSION_MINOR: u32 = 0;

/// Name of the variable-snapshot predicate registered on every connection
pub const VARIABLES_MATCH: &str = "variables_match";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Properties (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS Connections (
    connection_id TEXT PRIMARY KEY,
    source_guid TEXT NOT NULL,
    source_path TEXT NOT NULL,
    last_mod_time INTEGER NOT NULL,
    last_used_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Rulesets (
    ruleset_id TEXT PRIMARY KEY,
    ruleset_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS HierarchyLevels (
    id INTEGER PRIMARY KEY,
    physical_parent_node_id INTEGER,
    virtual_parent_node_id INTEGER REFERENCES Nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
    connection_id TEXT NOT NULL REFERENCES Connections(connection_id) ON DELETE CASCADE,
    ruleset_id TEXT NOT NULL REFERENCES Rulesets(ruleset_id) ON DELETE CASCADE,
    locale TEXT NOT NULL,
    removal_marker TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS UX_HierarchyLevels_Identity ON HierarchyLevels(
    IFNULL(virtual_parent_node_id, 0), connection_id, ruleset_id, locale, IFNULL(removal_marker, '')
);
CREATE INDEX IF NOT EXISTS IX_HierarchyLevels_PhysicalParent ON HierarchyLevels(physical_parent_node_id);

CREATE TABLE IF NOT EXISTS DataSources (
    id INTEGER PRIMARY KEY,
    hierarchy_level_id INTEGER NOT NULL REFERENCES HierarchyLevels(id) ON DELETE CASCADE,
    parent_id INTEGER REFERENCES DataSources(id) ON DELETE CASCADE,
    full_index TEXT NOT NULL,
    is_initialized BOOLEAN NOT NULL DEFAULT 0,
    filter TEXT NOT NULL DEFAULT '',
    specification_hash TEXT NOT NULL DEFAULT '',
    node_types TEXT NOT NULL DEFAULT '',
    is_partial BOOLEAN NOT NULL DEFAULT 0,
    has_nodes BOOLEAN,
    direct_nodes_count INTEGER,
    total_nodes_count INTEGER,
    custom_json TEXT
);
CREATE INDEX IF NOT EXISTS IX_DataSources_Level ON DataSources(hierarchy_level_id, full_index);

CREATE TABLE IF NOT EXISTS DataSourceClasses (
    data_source_id INTEGER NOT NULL REFERENCES DataSources(id) ON DELETE CASCADE,
    class_id INTEGER NOT NULL,
    polymorphic BOOLEAN NOT NULL,
    PRIMARY KEY (data_source_id, class_id)
);
CREATE INDEX IF NOT EXISTS IX_DataSourceClasses_Class ON DataSourceClasses(class_id);

CREATE TABLE IF NOT EXISTS DataSourceVariables (
    data_source_id INTEGER NOT NULL REFERENCES DataSources(id) ON DELETE CASCADE,
    variable_id TEXT NOT NULL,
    last_value TEXT NOT NULL,
    PRIMARY KEY (data_source_id, variable_id)
);
CREATE INDEX IF NOT EXISTS IX_DataSourceVariables_Variable ON DataSourceVariables(variable_id);

CREATE TABLE IF NOT EXISTS Nodes (
    id INTEGER PRIMARY KEY,
    data_source_id INTEGER NOT NULL REFERENCES DataSources(id) ON DELETE CASCADE,
    local_index TEXT NOT NULL,
    visibility INTEGER NOT NULL,
    payload TEXT NOT NULL,
    label TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS IX_Nodes_DataSource ON Nodes(data_source_id, local_index);

CREATE TABLE IF NOT EXISTS NodeKeys (
    node_id INTEGER PRIMARY KEY REFERENCES Nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
    type TEXT NOT NULL,
    specification_identifier TEXT NOT NULL,
    path_from_root TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS IX_NodeKeys_Path ON NodeKeys(path_from_root);

CREATE TABLE IF NOT EXISTS NodeInstances (
    node_id INTEGER NOT NULL REFERENCES Nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
    class_id INTEGER NOT NULL,
    instance_id INTEGER NOT NULL,
    is_directly_related BOOLEAN NOT NULL
);
CREATE INDEX IF NOT EXISTS IX_NodeInstances_Instance ON NodeInstances(class_id, instance_id);
CREATE INDEX IF NOT EXISTS IX_NodeInstances_Node ON NodeInstances(node_id);

CREATE TABLE IF NOT EXISTS NodesOrder (
    node_id INTEGER PRIMARY KEY REFERENCES Nodes(id) ON DELETE CASCADE ON UPDATE CASCADE,
    hierarchy_level_id INTEGER NOT NULL,
    data_source_id INTEGER NOT NULL,
    order_value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS IX_NodesOrder_Level ON NodesOrder(hierarchy_level_id, order_value);

CREATE TRIGGER IF NOT EXISTS TR_Nodes_Order AFTER INSERT ON Nodes
BEGIN
    INSERT INTO NodesOrder (node_id, hierarchy_level_id, data_source_id, order_value)
    SELECT NEW.id, ds.hierarchy_level_id, ds.id,
           CASE
               WHEN ds.full_index = '' THEN NEW.local_index
               WHEN NEW.local_index = '' THEN ds.full_index
               ELSE ds.full_index || '.' || NEW.local_index
           END
      FROM DataSources ds
     WHERE ds.id = NEW.data_source_id;
END;
"#;

/// Tables created by [`create`], in creation order
pub const TABLES: &[&str] = &[
    "Properties",
    "Connections",
    "Rulesets",
    "HierarchyLevels",
    "DataSources",
    "DataSourceClasses",
    "DataSourceVariables",
    "Nodes",
    "NodeKeys",
    "NodeInstances",
    "NodesOrder",
];

/// State of an existing database file relative to this build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreVersion {
    /// Nothing created yet
    Empty,
    Compatible,
    /// Must be discarded, with the reason
    Incompatible(String),
}

/// Create all tables and stamp the version
pub fn create(conn: &Connection, update_tracking: bool) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR REPLACE INTO Properties (key, value) VALUES ('version', ?1)",
        params![format!("{}.{}", CACHE_VERSION_MAJOR, CACHE_VERSION_MINOR)],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO Properties (key, value) VALUES ('update_tracking', ?1)",
        params![if update_tracking { "1" } else { "0" }],
    )?;
    Ok(())
}

/// Inspect the version stamp of an opened database
pub fn check_version(conn: &Connection, require_update_tracking: bool) -> Result<StoreVersion> {
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    if tables == 0 {
        return Ok(StoreVersion::Empty);
    }

    let has_properties: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'Properties')",
        [],
        |row| row.get(0),
    )?;
    if !has_properties {
        return Ok(StoreVersion::Incompatible("missing version stamp".to_string()));
    }

    let version: Option<String> = conn
        .query_row("SELECT value FROM Properties WHERE key = 'version'", [], |row| row.get(0))
        .optional()?;
    let Some(version) = version else {
        return Ok(StoreVersion::Incompatible("missing version stamp".to_string()));
    };
    let major = version
        .split('.')
        .next()
        .and_then(|major| major.parse::<u32>().ok());
    if major != Some(CACHE_VERSION_MAJOR) {
        return Ok(StoreVersion::Incompatible(format!(
            "store version {} does not match {}.{}",
            version, CACHE_VERSION_MAJOR, CACHE_VERSION_MINOR
        )));
    }

    if require_update_tracking {
        let tracking: Option<String> = conn
            .query_row(
                "SELECT value FROM Properties WHERE key = 'update_tracking'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if tracking.as_deref() != Some("1") {
            return Ok(StoreVersion::Incompatible(
                "store lacks update tracking data".to_string(),
            ));
        }
    }
    Ok(StoreVersion::Compatible)
}

/// Register the custom SQL functions used by cache queries.
///
/// `variables_match(variable_id, last_value, live_variables)` is true when the
/// live variables (a JSON object, bound once per statement) hold `last_value`
/// for `variable_id`. Missing live variables read as null.
pub fn register_functions(conn: &Connection) -> Result<()> {
    type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

    conn.create_scalar_function(
        VARIABLES_MATCH,
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let variable_id: String = ctx.get(0)?;
            let last_value: String = ctx.get(1)?;
            let live = ctx.get_or_create_aux(2, |value| -> std::result::Result<_, BoxError> {
                Ok(RulesetVariables::from_json_str(value.as_str()?)?)
            })?;
            let last: serde_json::Value = serde_json::from_str(&last_value)
                .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
            Ok(live.value_or_null(&variable_id) == last)
        },
    )?;
    Ok(())
}

/// WHERE fragment accepting data sources (aliased `ds`) whose variable
/// snapshot matches the live variables bound at parameter `?{param}`
pub(crate) fn variables_filter(param: usize) -> String {
    format!(
        "NOT EXISTS (SELECT 1 FROM DataSourceVariables dsv \
         WHERE dsv.data_source_id = ds.id \
         AND NOT {}(dsv.variable_id, dsv.last_value, ?{}))",
        VARIABLES_MATCH, param
    )
}
