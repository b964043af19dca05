//! The hierarchy cache object and its persistent store.

use crate::config::CacheConfig;
use crate::error::{or_log, Result};
use crate::metrics::{CacheMetrics, CacheStats, StoreStats};
use crate::quick::QuickCaches;
use crate::schema::{self, StoreVersion};
use parking_lot::{Mutex, ReentrantMutex};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node count above which the store is re-analyzed after an outermost commit
pub(crate) const OPTIMIZE_THRESHOLD: i64 = 1000;

/// Persistent, mutation-aware memoization of navigation hierarchies.
///
/// One coarse mutex guards the SQLite connection; the in-memory quick caches
/// sit behind a second mutex that is never held across a store operation.
/// The connection mutex is reentrant so that an open [`Savepoint`] keeps it
/// for its whole lifetime while the owning thread goes on using the cache.
///
/// [`Savepoint`]: crate::Savepoint
pub struct HierarchyCache {
    pub(crate) db: ReentrantMutex<Connection>,
    pub(crate) quick: Mutex<QuickCaches>,
    pub(crate) metrics: CacheMetrics,
    pub(crate) savepoint_depth: AtomicUsize,
    config: CacheConfig,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for HierarchyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyCache")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HierarchyCache {
    /// Open (or create) the store described by `config`.
    ///
    /// A store stamped with another major version, or one lacking update
    /// tracking data when the config requires it, is deleted and recreated.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let path = config.database_path();
        let conn = match &path {
            None => Connection::open_in_memory()?,
            Some(path) => open_file(path, config.require_update_tracking)?,
        };
        configure(&conn, &config)?;
        schema::register_functions(&conn)?;
        schema::create(&conn, config.require_update_tracking)?;
        debug!(path = ?path, "hierarchy cache opened");

        Ok(Self {
            db: ReentrantMutex::new(conn),
            quick: Mutex::new(QuickCaches::new(
                config.provider_quick_cache_size,
                config.node_quick_cache_size,
            )),
            metrics: CacheMetrics::default(),
            savepoint_depth: AtomicUsize::new(0),
            config,
            path,
        })
    }

    /// Private in-memory store with default settings
    pub fn in_memory() -> Result<Self> {
        Self::open(CacheConfig::in_memory())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with the locked connection
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.db.lock();
        f(&conn)
    }

    /// Run a read with the locked connection; failures are logged and
    /// replaced by `default`
    pub(crate) fn read<T>(
        &self,
        what: &str,
        default: T,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> T {
        or_log(self.with_conn(f), what, default)
    }

    /// Run a multi-statement mutation so that it applies completely or not at all
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.db.lock();
        conn.execute_batch("SAVEPOINT mutation")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("RELEASE mutation")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK TO mutation; RELEASE mutation") {
                    warn!(error = %rollback, "failed to roll back mutation");
                }
                Err(err)
            }
        }
    }

    /// Size of the database in bytes
    pub fn size_bytes(&self) -> u64 {
        self.read("size query", 0, |conn| Ok(database_size(conn)?))
    }

    /// Row counts of the store plus quick cache counters
    pub fn stats(&self) -> CacheStats {
        let store = self.read("stats query", StoreStats::default(), |conn| {
            let count = |table: &str| -> rusqlite::Result<u64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n as u64)
            };
            Ok(StoreStats {
                connections: count("Connections")?,
                rulesets: count("Rulesets")?,
                hierarchy_levels: count("HierarchyLevels")?,
                data_sources: count("DataSources")?,
                nodes: count("Nodes")?,
                size_bytes: database_size(conn)?,
            })
        });
        self.metrics.snapshot(store)
    }

    /// Number of cached nodes
    pub fn node_count(&self) -> u64 {
        self.read("node count", 0, |conn| Ok(node_count(conn)? as u64))
    }

    /// Delete everything, or only what belongs to `connection_id`
    pub fn clear(&self, connection_id: Option<&str>) -> Result<usize> {
        let removed = self.mutate(|conn| {
            Ok(match connection_id {
                Some(id) => conn.execute("DELETE FROM Connections WHERE connection_id = ?1", [id])?,
                None => {
                    let levels = conn.execute("DELETE FROM HierarchyLevels", [])?;
                    conn.execute("DELETE FROM Connections", [])?;
                    conn.execute("DELETE FROM Rulesets", [])?;
                    levels
                }
            })
        })?;
        self.quick.lock().clear();
        info!(connection = ?connection_id, removed, "cache cleared");
        Ok(removed)
    }
}

impl Drop for HierarchyCache {
    fn drop(&mut self) {
        if self.config.size_limit_bytes.is_some() {
            if let Err(err) = self.compact() {
                warn!(error = %err, "compaction on shutdown failed");
            }
        }
    }
}

fn open_file(path: &Path, require_update_tracking: bool) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(path)?;
    match schema::check_version(&conn, require_update_tracking)? {
        StoreVersion::Empty | StoreVersion::Compatible => Ok(conn),
        StoreVersion::Incompatible(reason) => {
            warn!(path = %path.display(), %reason, "discarding hierarchy cache");
            drop(conn);
            remove_database_files(path)?;
            Ok(Connection::open(path)?)
        }
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(PathBuf::from(file)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn configure(conn: &Connection, config: &CacheConfig) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if config.is_memory() {
        conn.pragma_update(None, "synchronous", 0)?;
    } else {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        conn.pragma_update(None, "synchronous", 1)?;
        conn.pragma_update(None, "journal_size_limit", 0)?;
    }
    Ok(())
}

pub(crate) fn database_size(conn: &Connection) -> rusqlite::Result<u64> {
    let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok((pages * page_size) as u64)
}

pub(crate) fn node_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM Nodes", [], |row| row.get(0))
}

/// Make sure the rows a hierarchy level references exist
pub(crate) fn ensure_owner_rows(conn: &Connection, connection_id: &str, ruleset_id: &str) -> Result<()> {
    let known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM Connections WHERE connection_id = ?1",
            [connection_id],
            |row| row.get(0),
        )
        .optional()?;
    if known.is_none() {
        conn.execute(
            "INSERT INTO Connections (connection_id, source_guid, source_path, last_mod_time, last_used_time)
             VALUES (?1, '', '', 0, ?2)",
            rusqlite::params![connection_id, chrono::Utc::now().timestamp_millis()],
        )?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO Rulesets (ruleset_id, ruleset_hash) VALUES (?1, '')",
        [ruleset_id],
    )?;
    Ok(())
}
