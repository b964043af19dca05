//! Cache counters and statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss counters of the quick caches
#[derive(Debug, Default)]
pub struct CacheMetrics {
    provider_hits: AtomicU64,
    provider_misses: AtomicU64,
    node_hits: AtomicU64,
    node_misses: AtomicU64,
    /// Quick entries skipped because they were in use elsewhere
    busy_skips: AtomicU64,
    savepoint_rollbacks: AtomicU64,
}

impl CacheMetrics {
    pub fn record_provider(&self, hit: bool) {
        let counter = if hit { &self.provider_hits } else { &self.provider_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node(&self, hit: bool) {
        let counter = if hit { &self.node_hits } else { &self.node_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy_skip(&self) {
        self.busy_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollback(&self) {
        self.savepoint_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, store: StoreStats) -> CacheStats {
        CacheStats {
            store,
            provider_hits: self.provider_hits.load(Ordering::Relaxed),
            provider_misses: self.provider_misses.load(Ordering::Relaxed),
            node_hits: self.node_hits.load(Ordering::Relaxed),
            node_misses: self.node_misses.load(Ordering::Relaxed),
            busy_skips: self.busy_skips.load(Ordering::Relaxed),
            savepoint_rollbacks: self.savepoint_rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// Row counts of the persistent store
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub connections: u64,
    pub rulesets: u64,
    pub hierarchy_levels: u64,
    pub data_sources: u64,
    pub nodes: u64,
    pub size_bytes: u64,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub store: StoreStats,
    pub provider_hits: u64,
    pub provider_misses: u64,
    pub node_hits: u64,
    pub node_misses: u64,
    pub busy_skips: u64,
    pub savepoint_rollbacks: u64,
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl CacheStats {
    /// Quick provider cache hit rate (0.0 to 1.0)
    pub fn provider_hit_rate(&self) -> f64 {
        rate(self.provider_hits, self.provider_misses)
    }

    /// Quick node cache hit rate (0.0 to 1.0)
    pub fn node_hit_rate(&self) -> f64 {
        rate(self.node_hits, self.node_misses)
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Hierarchy Cache Statistics:")?;
        writeln!(
            f,
            "  Connections: {} | Rulesets: {}",
            self.store.connections, self.store.rulesets
        )?;
        writeln!(
            f,
            "  Levels: {} | Data Sources: {} | Nodes: {}",
            self.store.hierarchy_levels, self.store.data_sources, self.store.nodes
        )?;
        writeln!(
            f,
            "  Size: {:.2} MB",
            self.store.size_bytes as f64 / 1_048_576.0
        )?;
        writeln!(
            f,
            "  Providers: {} hits | {} misses | {:.1}%",
            self.provider_hits,
            self.provider_misses,
            self.provider_hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Nodes: {} hits | {} misses | {:.1}%",
            self.node_hits,
            self.node_misses,
            self.node_hit_rate() * 100.0
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rates() {
        let metrics = CacheMetrics::default();
        metrics.record_node(true);
        metrics.record_node(true);
        metrics.record_node(false);
        metrics.record_provider(false);

        let stats = metrics.snapshot(StoreStats::default());
        assert!((stats.node_hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.provider_hit_rate(), 0.0);
    }

    #[test]
    fn test_display_snapshot() {
        let metrics = CacheMetrics::default();
        metrics.record_provider(true);
        metrics.record_provider(false);
        let stats = metrics.snapshot(StoreStats {
            connections: 1,
            rulesets: 2,
            hierarchy_levels: 3,
            data_sources: 4,
            nodes: 5,
            size_bytes: 2_097_152,
        });
        insta::assert_snapshot!(stats.to_string(), @r###"
        Hierarchy Cache Statistics:
          Connections: 1 | Rulesets: 2
          Levels: 3 | Data Sources: 4 | Nodes: 5
          Size: 2.00 MB
          Providers: 1 hits | 1 misses | 50.0%
          Nodes: 0 hits | 0 misses | 0.0%
        "###);
    }
}
