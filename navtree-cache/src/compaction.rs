//! Size-bounded compaction of the persistent store.

use crate::error::Result;
use crate::store::{database_size, HierarchyCache};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::{debug, info};

/// What a compaction run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub size_before: u64,
    pub size_after: u64,
    /// Connections whose cached data was evicted, oldest first
    pub evicted_connections: Vec<String>,
}

impl HierarchyCache {
    /// Compact down to the configured size limit, if any
    pub fn compact(&self) -> Result<CompactionReport> {
        match self.config().size_limit_bytes {
            Some(limit) => self.compact_to(limit),
            None => {
                let size = self.size_bytes();
                Ok(CompactionReport {
                    size_before: size,
                    size_after: size,
                    evicted_connections: Vec::new(),
                })
            }
        }
    }

    /// Evict the least recently used connection and vacuum until the store
    /// is no larger than `limit_bytes` or nothing is left to evict.
    ///
    /// Waits for other threads' savepoints to finish. Does nothing while the
    /// calling thread has a savepoint open.
    pub fn compact_to(&self, limit_bytes: u64) -> Result<CompactionReport> {
        let report = self.with_conn(|conn| {
            let mut report = CompactionReport {
                size_before: database_size(conn)?,
                ..Default::default()
            };
            if self.savepoint_depth() > 0 {
                debug!("compaction skipped inside a savepoint");
                report.size_after = report.size_before;
                return Ok(report);
            }
            let mut size = report.size_before;
            while size > limit_bytes {
                let oldest: Option<String> = conn
                    .query_row(
                        "SELECT connection_id FROM Connections ORDER BY last_used_time ASC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(oldest) = oldest else {
                    break;
                };
                conn.execute("DELETE FROM Connections WHERE connection_id = ?1", [&oldest])?;
                conn.execute_batch("VACUUM")?;
                size = database_size(conn)?;
                debug!(connection = %oldest, size, "connection evicted");
                report.evicted_connections.push(oldest);
            }
            report.size_after = size;
            Ok(report)
        })?;

        if !report.evicted_connections.is_empty() {
            let mut quick = self.quick.lock();
            for connection in &report.evicted_connections {
                quick.remove_connection(connection);
            }
            info!(
                before = report.size_before,
                after = report.size_after,
                evicted = report.evicted_connections.len(),
                "hierarchy cache compacted"
            );
        }
        Ok(report)
    }
}
