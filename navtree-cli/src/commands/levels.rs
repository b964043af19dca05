//! Listing of cached hierarchy levels.

use anyhow::Result;
use navtree_cache::{HierarchyCache, LevelSummary};
use navtree_types::NodeId;

fn describe(id: Option<NodeId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_level(level: &LevelSummary) {
    let identifier = &level.identifier;
    println!(
        "{:>6}  {}/{}/{}  parent {} (physical {})  data sources {}/{}  nodes {}{}",
        describe_level(level),
        identifier.connection_id(),
        identifier.ruleset_id(),
        identifier.locale(),
        describe(identifier.virtual_parent),
        describe(identifier.physical_parent()),
        level.initialized_data_sources,
        level.data_sources,
        level.nodes,
        if identifier.removal_id().is_some() {
            "  (pending removal)"
        } else {
            ""
        },
    );
}

fn describe_level(level: &LevelSummary) -> String {
    level
        .identifier
        .id
        .map(|id| format!("#{}", id))
        .unwrap_or_default()
}

pub fn list_levels(cache: &HierarchyCache, connection: Option<&str>, json: bool) -> Result<()> {
    let levels = cache.list_levels(connection);
    if json {
        println!("{}", serde_json::to_string_pretty(&levels)?);
        return Ok(());
    }
    if levels.is_empty() {
        println!("No cached hierarchy levels");
        return Ok(());
    }
    for level in &levels {
        print_level(level);
    }
    println!("{} level(s)", levels.len());
    Ok(())
}
