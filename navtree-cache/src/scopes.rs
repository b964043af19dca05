//! Scoped replay of cached nodes.

use crate::levels::{opt_id, removal_param};
use crate::nodes::{node_from_row, NODE_COLUMNS, NODE_JOINS};
use crate::schema::variables_filter;
use crate::store::HierarchyCache;
use navtree_types::{
    CombinedHierarchyLevelIdentifier, DataSourceId, HierarchyLevelId, NodeRef, NodeVisibility,
    PageOptions, RulesetVariables,
};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

/// Which cached nodes a replay covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodesScope {
    /// Visible nodes of every level under one physical parent
    CombinedLevel(CombinedHierarchyLevelIdentifier),
    /// Visible and virtual nodes of one level
    HierarchyLevel(HierarchyLevelId),
    /// All direct nodes of one data source, whatever their visibility
    DataSource(DataSourceId),
    /// Visible direct nodes of one data source
    VisibleInDataSource(DataSourceId),
    /// Nodes whose children are not known yet: no child level, or a child
    /// level with an uninitialized data source
    UndeterminedChildren {
        connection_id: String,
        ruleset_id: String,
    },
    /// Visible nodes whose label contains `text`
    LabelFiltered {
        connection_id: String,
        ruleset_id: String,
        text: String,
    },
}

/// Nodes inside hidden subtrees, including the hidden nodes themselves
const HIDDEN_NODES: &str = "WITH RECURSIVE HiddenNodes(node_id) AS (
         SELECT id FROM Nodes WHERE visibility = 2
         UNION
         SELECT n.id
           FROM HiddenNodes h
           JOIN HierarchyLevels chl ON chl.virtual_parent_node_id = h.node_id
           JOIN DataSources cds ON cds.hierarchy_level_id = chl.id
           JOIN Nodes n ON n.data_source_id = cds.id
     ) ";

struct ScopeQuery {
    cte: &'static str,
    condition: String,
    order: &'static str,
    params: Vec<SqlValue>,
}

/// Escape `text` for a `LIKE ... ESCAPE '\'` substring match
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn opt_integer(value: Option<i64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Integer)
}

fn scope_query(scope: &NodesScope) -> ScopeQuery {
    let visible = NodeVisibility::Visible.as_i32();
    let hidden = NodeVisibility::Hidden.as_i32();
    match scope {
        NodesScope::CombinedLevel(combined) => ScopeQuery {
            cte: "",
            condition: format!(
                "hl.physical_parent_node_id IS ?1 AND hl.connection_id = ?2 AND hl.ruleset_id = ?3 \
                 AND hl.locale = ?4 AND hl.removal_marker IS ?5 AND n.visibility = {visible}"
            ),
            order: "no.order_value",
            params: vec![
                opt_integer(opt_id(combined.physical_parent)),
                text(&combined.connection_id),
                text(&combined.ruleset_id),
                text(&combined.locale),
                removal_param(combined.removal_id).map_or(SqlValue::Null, SqlValue::Text),
            ],
        },
        NodesScope::HierarchyLevel(level) => ScopeQuery {
            cte: "",
            condition: format!("hl.id = ?1 AND n.visibility != {hidden}"),
            order: "no.order_value",
            params: vec![SqlValue::Integer(level.as_i64())],
        },
        NodesScope::DataSource(id) => ScopeQuery {
            cte: "",
            condition: "ds.id = ?1".to_string(),
            order: "no.order_value",
            params: vec![SqlValue::Integer(id.as_i64())],
        },
        NodesScope::VisibleInDataSource(id) => ScopeQuery {
            cte: "",
            condition: format!("ds.id = ?1 AND n.visibility = {visible}"),
            order: "no.order_value",
            params: vec![SqlValue::Integer(id.as_i64())],
        },
        NodesScope::UndeterminedChildren {
            connection_id,
            ruleset_id,
        } => ScopeQuery {
            cte: HIDDEN_NODES,
            condition: "hl.connection_id = ?1 AND hl.ruleset_id = ?2 AND hl.removal_marker IS NULL \
                 AND (NOT EXISTS (SELECT 1 FROM HierarchyLevels chl \
                                   JOIN DataSources cds ON cds.hierarchy_level_id = chl.id \
                                  WHERE chl.virtual_parent_node_id = n.id) \
                      OR EXISTS (SELECT 1 FROM HierarchyLevels chl \
                                   JOIN DataSources cds ON cds.hierarchy_level_id = chl.id \
                                  WHERE chl.virtual_parent_node_id = n.id AND NOT cds.is_initialized)) \
                 AND n.id NOT IN (SELECT node_id FROM HiddenNodes)"
                .to_string(),
            order: "hl.id, no.order_value",
            params: vec![text(connection_id), text(ruleset_id)],
        },
        NodesScope::LabelFiltered {
            connection_id,
            ruleset_id,
            text: label,
        } => ScopeQuery {
            cte: HIDDEN_NODES,
            condition: format!(
                "hl.connection_id = ?1 AND hl.ruleset_id = ?2 AND hl.removal_marker IS NULL \
                 AND n.visibility = {visible} AND n.label LIKE ?3 ESCAPE '\\' \
                 AND n.id NOT IN (SELECT node_id FROM HiddenNodes)"
            ),
            order: "hl.id, no.order_value",
            params: vec![text(connection_id), text(ruleset_id), SqlValue::Text(like_pattern(label))],
        },
    }
}

impl HierarchyCache {
    /// Cached nodes of `scope` whose data sources match `variables`, in order
    pub fn load_nodes(&self, scope: &NodesScope, variables: &RulesetVariables, page: PageOptions) -> Vec<NodeRef> {
        if page.is_empty_page() {
            return Vec::new();
        }
        let query = scope_query(scope);
        let mut params = query.params;
        let variables_param = params.len() + 1;
        params.push(SqlValue::Text(variables.to_json_string()));
        params.push(SqlValue::Integer(page.size.map_or(-1, |size| size as i64)));
        params.push(SqlValue::Integer(page.start as i64));
        let sql = format!(
            "{cte}SELECT {NODE_COLUMNS}
               FROM Nodes n {NODE_JOINS}
               JOIN NodesOrder no ON no.node_id = n.id
              WHERE {condition} AND {variables}
              ORDER BY {order}
              LIMIT ?{limit} OFFSET ?{offset}",
            cte = query.cte,
            condition = query.condition,
            variables = variables_filter(variables_param),
            order = query.order,
            limit = variables_param + 1,
            offset = variables_param + 2,
        );
        self.read("load nodes", Vec::new(), |conn| {
            let mut stmt = conn.prepare_cached(&sql)?;
            let nodes = stmt
                .query_map(params_from_iter(params), node_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(nodes)
        })
    }

    /// Number of nodes [`HierarchyCache::load_nodes`] would return without paging
    pub fn count_nodes(&self, scope: &NodesScope, variables: &RulesetVariables) -> usize {
        let query = scope_query(scope);
        let mut params = query.params;
        let variables_param = params.len() + 1;
        params.push(SqlValue::Text(variables.to_json_string()));
        let sql = format!(
            "{cte}SELECT COUNT(*)
               FROM Nodes n {NODE_JOINS}
              WHERE {condition} AND {variables}",
            cte = query.cte,
            condition = query.condition,
            variables = variables_filter(variables_param),
        );
        self.read("count nodes", 0, |conn| {
            let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}
