//! A bounded, path-keyed, reference-counted cache of open databases (§4.12), modeled on the
//! admission-blocking discipline `vector-buffers`'s disk buffer uses for its ledger/writer
//! handshake: a single mutex plus a condition variable gates entry past capacity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::backend::file::LockMode;
use crate::config::{PoolConfig, RrdDef};
use crate::database::Database;
use crate::error::Result;

struct Entry {
    db: Arc<Database>,
    refcount: usize,
}

struct Inner {
    entries: HashMap<PathBuf, Entry>,
}

/// A capacity-bounded cache of open [`Database`]s, keyed by path. Concurrent callers that
/// `acquire` the same path share one open `Database`; the last `release` closes it.
pub struct Pool {
    config: PoolConfig,
    inner: Mutex<Inner>,
    admitted: Condvar,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner { entries: HashMap::new() }),
            admitted: Condvar::new(),
        }
    }

    /// Acquires the database already open at `path`, opening it (blocking for capacity if
    /// the pool is full) if it isn't already cached.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn acquire<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> Result<Arc<Database>> {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.lock();
        loop {
            if let Some(entry) = inner.entries.get_mut(&path) {
                entry.refcount += 1;
                return Ok(entry.db.clone());
            }
            if inner.entries.len() < self.config.capacity {
                break;
            }
            tracing::debug!(capacity = self.config.capacity, "pool at capacity, waiting for a release");
            self.admitted.wait(&mut inner);
        }

        let db = Arc::new(Database::open(&path, self.config.read_only, LockMode::Retry)?);
        inner.entries.insert(path, Entry { db: db.clone(), refcount: 1 });
        Ok(db)
    }

    /// Creates and caches a brand-new database from `def`. Per §4.12, if a database is
    /// already cached at `def.path()`, or the pool is at capacity, this call blocks rather
    /// than handing back the existing entry -- callers that merely want "open or reuse"
    /// should use [`Pool::acquire`] instead.
    #[tracing::instrument(skip(self, def), level = "debug")]
    pub fn acquire_new(&self, def: RrdDef) -> Result<Arc<Database>> {
        let mut inner = self.inner.lock();
        loop {
            let blocked = inner.entries.contains_key(def.path()) || inner.entries.len() >= self.config.capacity;
            if !blocked {
                break;
            }
            self.admitted.wait(&mut inner);
        }

        let path = def.path().to_path_buf();
        let db = Arc::new(Database::create(def)?);
        inner.entries.insert(path, Entry { db: db.clone(), refcount: 1 });
        Ok(db)
    }

    /// Releases one reference to the database at `path`. When the refcount reaches zero,
    /// the database is removed from the pool and closed, and any waiters are woken.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn release(&self, db: &Arc<Database>) -> Result<()> {
        let mut inner = self.inner.lock();
        let path = db.path().to_path_buf();
        let should_close = if let Some(entry) = inner.entries.get_mut(&path) {
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount == 0
        } else {
            false
        };
        if should_close {
            if let Some(entry) = inner.entries.remove(&path) {
                entry.db.close()?;
            }
            self.admitted.notify_all();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveDef, ConsolidationFunction};
    use crate::datasource::{DsDef, DsType};
    use temp_dir::TempDir;

    fn def(dir: &TempDir, name: &str) -> RrdDef {
        RrdDef::from_path(dir.path().join(name), 1000, 10)
            .data_source(DsDef::new("a", DsType::Gauge, 100, f64::NAN, f64::NAN).unwrap())
            .archive(ArchiveDef::new(ConsolidationFunction::Average, 0.5, 1, 10).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn acquire_same_path_shares_one_database_and_refcounts() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::new(PoolConfig::new());
        let db = pool.acquire_new(def(&dir, "a.rrd")).unwrap();
        let again = pool.acquire(db.path()).unwrap();
        assert!(Arc::ptr_eq(&db, &again));
        assert_eq!(pool.len(), 1);

        pool.release(&db).unwrap();
        assert_eq!(pool.len(), 1);
        pool.release(&again).unwrap();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn release_below_zero_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let pool = Pool::new(PoolConfig::new());
        let db = pool.acquire_new(def(&dir, "b.rrd")).unwrap();
        pool.release(&db).unwrap();
        assert!(pool.release(&db).is_ok());
    }
}
