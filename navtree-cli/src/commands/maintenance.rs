//! Compaction and clearing.

use anyhow::{bail, Result};
use navtree_cache::HierarchyCache;

pub fn compact(cache: &HierarchyCache, limit_bytes: Option<u64>) -> Result<()> {
    let report = match limit_bytes.or(cache.config().size_limit_bytes) {
        Some(limit) => cache.compact_to(limit)?,
        None => bail!("no size limit configured, pass --limit-bytes"),
    };
    println!(
        "Compacted {} -> {} bytes",
        report.size_before, report.size_after
    );
    for connection in &report.evicted_connections {
        println!("  evicted {}", connection);
    }
    Ok(())
}

pub fn clear(cache: &HierarchyCache, connection: Option<&str>) -> Result<()> {
    let removed = cache.clear(connection)?;
    match connection {
        Some(connection) if removed == 0 => println!("Connection {} is not cached", connection),
        Some(connection) => println!("Cleared connection {}", connection),
        None => println!("Removed {} hierarchy level(s)", removed),
    }
    Ok(())
}
