//! Rollback boundaries covering the store and the quick caches.

use crate::error::Result;
use crate::store::{node_count, HierarchyCache, OPTIMIZE_THRESHOLD};
use parking_lot::ReentrantMutexGuard;
use rusqlite::Connection;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// An open savepoint. Dropping it commits; [`Savepoint::cancel`] rolls back.
///
/// The savepoint owns the store lock until it finishes: other threads wait
/// on their next cache access, the opening thread keeps working and may nest.
#[must_use = "dropping a savepoint commits it immediately"]
pub struct Savepoint<'a> {
    cache: &'a HierarchyCache,
    conn: ReentrantMutexGuard<'a, Connection>,
    name: String,
    finished: bool,
}

impl std::fmt::Debug for Savepoint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Savepoint").field("name", &self.name).finish()
    }
}

impl HierarchyCache {
    /// Open a savepoint. Savepoints nest within one thread.
    pub fn savepoint(&self) -> Result<Savepoint<'_>> {
        let conn = self.db.lock();
        let depth = self.savepoint_depth.fetch_add(1, Ordering::SeqCst);
        let name = format!("sp_{}", depth);
        if let Err(err) = conn.execute_batch(&format!("SAVEPOINT {}", name)) {
            self.savepoint_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(err.into());
        }
        Ok(Savepoint {
            cache: self,
            conn,
            name,
            finished: false,
        })
    }

    /// Savepoints open on the store. Only the thread holding them can see a
    /// non-zero value while it has the store lock.
    pub fn savepoint_depth(&self) -> usize {
        self.savepoint_depth.load(Ordering::SeqCst)
    }
}

impl Savepoint<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit everything written since the savepoint was opened
    pub fn commit(mut self) -> Result<()> {
        self.finish_commit()
    }

    /// Discard everything written since the savepoint was opened, including
    /// the quick caches
    pub fn cancel(mut self) -> Result<()> {
        self.finished = true;
        let depth = self.cache.savepoint_depth.fetch_sub(1, Ordering::SeqCst) - 1;
        let name = &self.name;
        let result = self
            .conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
            .map_err(Into::into);
        self.cache.quick.lock().clear();
        self.cache.metrics.record_rollback();
        debug!(savepoint = %self.name, depth, "savepoint canceled");
        result
    }

    fn finish_commit(&mut self) -> Result<()> {
        self.finished = true;
        let depth = self.cache.savepoint_depth.fetch_sub(1, Ordering::SeqCst) - 1;
        let name = &self.name;
        self.conn.execute_batch(&format!("RELEASE {name}"))?;
        if depth == 0 && node_count(&self.conn)? > OPTIMIZE_THRESHOLD {
            self.conn.execute_batch("PRAGMA optimize")?;
        }
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.finish_commit() {
                warn!(savepoint = %self.name, error = %err, "failed to release savepoint");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset_count(cache: &HierarchyCache) -> i64 {
        cache
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM Rulesets", [], |r| r.get(0))?))
            .unwrap()
    }

    fn insert_ruleset(cache: &HierarchyCache, id: &str) {
        cache
            .with_conn(|conn| {
                conn.execute("INSERT INTO Rulesets VALUES (?1, '')", [id])?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_cancel_rolls_back() {
        let cache = HierarchyCache::in_memory().unwrap();
        let sp = cache.savepoint().unwrap();
        insert_ruleset(&cache, "a");
        assert_eq!(ruleset_count(&cache), 1);
        sp.cancel().unwrap();
        assert_eq!(ruleset_count(&cache), 0);
        assert_eq!(cache.savepoint_depth(), 0);
    }

    #[test]
    fn test_drop_commits_and_nesting() {
        let cache = HierarchyCache::in_memory().unwrap();
        {
            let _outer = cache.savepoint().unwrap();
            insert_ruleset(&cache, "a");
            let inner = cache.savepoint().unwrap();
            assert_eq!(cache.savepoint_depth(), 2);
            insert_ruleset(&cache, "b");
            inner.cancel().unwrap();
        }
        assert_eq!(ruleset_count(&cache), 1);
        assert_eq!(cache.savepoint_depth(), 0);
    }

    fn has_ruleset(cache: &HierarchyCache, id: &str) -> bool {
        cache
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM Rulesets WHERE ruleset_id = ?1", [id], |r| {
                    r.get::<_, i64>(0)
                })?)
            })
            .unwrap()
            > 0
    }

    #[test]
    fn test_concurrent_savepoints_do_not_interleave() {
        use std::sync::Barrier;
        use std::thread;
        use std::time::Duration;

        let cache = HierarchyCache::in_memory().unwrap();
        let opened = Barrier::new(2);
        thread::scope(|scope| {
            let first = scope.spawn(|| {
                let sp = cache.savepoint().unwrap();
                insert_ruleset(&cache, "a");
                opened.wait();
                thread::sleep(Duration::from_millis(50));
                // the other thread is still waiting for the store
                assert!(!has_ruleset(&cache, "b"));
                sp.cancel().unwrap();
            });
            let second = scope.spawn(|| {
                opened.wait();
                let outer = cache.savepoint().unwrap();
                let inner = cache.savepoint().unwrap();
                assert_eq!(inner.name(), "sp_1");
                insert_ruleset(&cache, "b");
                inner.commit().unwrap();
                outer.commit().unwrap();
            });
            first.join().unwrap();
            second.join().unwrap();
        });

        assert!(!has_ruleset(&cache, "a"));
        assert!(has_ruleset(&cache, "b"));
        assert_eq!(cache.savepoint_depth(), 0);
    }
}
