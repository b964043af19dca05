//! Connection and ruleset bookkeeping.

use crate::error::Result;
use crate::store::HierarchyCache;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Identity of an opened data store connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: String,
    /// Stable identifier of the underlying data store
    pub source_guid: String,
    pub source_path: String,
    /// Modification time of the data store, milliseconds since the epoch
    pub last_mod_time: i64,
}

impl ConnectionInfo {
    pub fn new(
        connection_id: impl Into<String>,
        source_guid: impl Into<String>,
        source_path: impl Into<String>,
        last_mod_time: i64,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            source_guid: source_guid.into(),
            source_path: source_path.into(),
            last_mod_time,
        }
    }
}

impl HierarchyCache {
    /// Register a connection and touch its last-used time.
    ///
    /// When the data store changed behind the cache (different guid or
    /// modification time) everything cached for the connection is dropped
    /// first. Returns true in that case.
    pub fn on_connection_opened(&self, info: &ConnectionInfo) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let stale = self.mutate(|conn| {
            let stored: Option<(String, i64)> = conn
                .query_row(
                    "SELECT source_guid, last_mod_time FROM Connections WHERE connection_id = ?1",
                    [&info.connection_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let stale = matches!(
                &stored,
                Some((guid, mod_time)) if !guid.is_empty()
                    && (*guid != info.source_guid || *mod_time != info.last_mod_time)
            );
            if stale {
                conn.execute(
                    "DELETE FROM Connections WHERE connection_id = ?1",
                    [&info.connection_id],
                )?;
            }
            conn.execute(
                "INSERT INTO Connections (connection_id, source_guid, source_path, last_mod_time, last_used_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(connection_id) DO UPDATE SET
                     source_guid = excluded.source_guid,
                     source_path = excluded.source_path,
                     last_mod_time = excluded.last_mod_time,
                     last_used_time = excluded.last_used_time",
                params![
                    info.connection_id,
                    info.source_guid,
                    info.source_path,
                    info.last_mod_time,
                    now
                ],
            )?;
            Ok(stale)
        })?;
        if stale {
            self.quick.lock().remove_connection(&info.connection_id);
            info!(connection = %info.connection_id, "data store changed, cached hierarchies dropped");
        } else {
            debug!(connection = %info.connection_id, "connection opened");
        }
        Ok(stale)
    }

    /// Forget quick cache entries of a closed connection
    pub fn on_connection_closed(&self, connection_id: &str) {
        self.quick.lock().remove_connection(connection_id);
        debug!(connection = %connection_id, "connection closed");
    }

    /// Record the ruleset in use. A changed hash drops everything cached for
    /// the ruleset. Runs compaction when a size limit is configured.
    pub fn on_ruleset_used(&self, ruleset_id: &str, ruleset_hash: &str) -> Result<bool> {
        let changed = self.mutate(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT ruleset_hash FROM Rulesets WHERE ruleset_id = ?1",
                    [ruleset_id],
                    |row| row.get(0),
                )
                .optional()?;
            let changed = matches!(&stored, Some(hash) if !hash.is_empty() && hash != ruleset_hash);
            if changed {
                conn.execute("DELETE FROM Rulesets WHERE ruleset_id = ?1", [ruleset_id])?;
            }
            conn.execute(
                "INSERT INTO Rulesets (ruleset_id, ruleset_hash) VALUES (?1, ?2)
                 ON CONFLICT(ruleset_id) DO UPDATE SET ruleset_hash = excluded.ruleset_hash",
                params![ruleset_id, ruleset_hash],
            )?;
            Ok(changed)
        })?;
        if changed {
            self.quick.lock().clear();
            info!(ruleset = %ruleset_id, "ruleset changed, cached hierarchies dropped");
        }
        if self.config().size_limit_bytes.is_some() {
            if let Err(err) = self.compact() {
                warn!(error = %err, "opportunistic compaction failed");
            }
        }
        Ok(changed)
    }
}
