use anyhow::Result;
use navtree_cache::HierarchyCache;

pub fn show_stats(cache: &HierarchyCache, json: bool) -> Result<()> {
    let stats = cache.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats.store)?);
    } else {
        if let Some(path) = cache.path() {
            println!("Store: {}", path.display());
        }
        print!("{}", stats);
    }
    Ok(())
}
