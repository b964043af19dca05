//! Two-phase removal of combined hierarchy levels.
//!
//! Marking moves the current levels out of the way so that a fresh
//! computation can create replacements under the same identity; sweeping
//! deletes the marked levels (and, through cascades, everything below them).

use crate::error::Result;
use crate::levels::opt_id;
use crate::store::HierarchyCache;
use navtree_types::{CombinedHierarchyLevelIdentifier, RemovalId};
use rusqlite::params;
use tracing::debug;

impl HierarchyCache {
    /// Mark all live levels of the combined level for removal
    pub fn create_removal_marker(&self, combined: &CombinedHierarchyLevelIdentifier) -> Result<RemovalId> {
        let token = RemovalId::generate();
        let marked = self.mutate(|conn| {
            Ok(conn.execute(
                "UPDATE HierarchyLevels SET removal_marker = ?1
                  WHERE physical_parent_node_id IS ?2 AND connection_id = ?3
                    AND ruleset_id = ?4 AND locale = ?5 AND removal_marker IS NULL",
                params![
                    token.as_str(),
                    opt_id(combined.physical_parent),
                    combined.connection_id,
                    combined.ruleset_id,
                    combined.locale,
                ],
            )?)
        })?;
        self.quick.lock().remove_provider(combined);
        debug!(%token, marked, "removal marker created");
        Ok(token)
    }

    /// Delete the levels marked with `token`
    pub fn remove(&self, token: RemovalId) -> Result<usize> {
        let removed = self.mutate(|conn| {
            Ok(conn.execute(
                "DELETE FROM HierarchyLevels WHERE removal_marker = ?1",
                [token.as_str()],
            )?)
        })?;
        self.quick.lock().clear();
        debug!(%token, removed, "marked levels removed");
        Ok(removed)
    }
}
