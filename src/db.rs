//! Persistent metadata cache shared by all scans
//!
//! The store is advisory: `get_batch` and `put_batch` never fail. Backend
//! errors are logged and degrade to cache misses, so a broken cache only
//! makes scans slower. The `try_*` variants expose the underlying errors.

use log::{info, warn};
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{APP_DIR_NAME, DB_FILE_NAME};
use crate::error::ScanError;
use crate::models::{CachedMetadata, ImageRecord};

/// SQLite caps bound parameters per statement at 999 on older builds
pub const MAX_QUERY_PARAMS: usize = 900;

/// How long a writer waits on another connection's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Image dimension cache keyed by normalized path
pub struct MetadataStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ScanError::from(e).with_path(parent))?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, Some(path.to_path_buf()))?;
        info!("Metadata store opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    /// Open the store in the per-user data directory
    pub fn open_default() -> Result<Self, ScanError> {
        let path = Self::default_path()
            .ok_or_else(|| ScanError::database_error("no per-user data directory available"))?;
        Self::open(&path)
    }

    /// Location of the store file in the per-user data directory
    ///
    /// - Linux: ~/.local/share/gallery_scanner/metadata_cache.db
    /// - macOS: ~/Library/Application Support/gallery_scanner/metadata_cache.db
    /// - Windows: %APPDATA%\gallery_scanner\metadata_cache.db
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::data_dir().or_else(dirs::home_dir)?;
        path.push(APP_DIR_NAME);
        path.push(DB_FILE_NAME);
        Some(path)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, ScanError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // In-memory databases answer "memory" here, which is fine.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Initialize database schema
    fn init_schema(conn: &Connection) -> Result<(), ScanError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS image_metadata (
                path TEXT PRIMARY KEY,
                width INTEGER,
                height INTEGER,
                size INTEGER,
                mtime REAL
            );
            CREATE INDEX IF NOT EXISTS idx_image_metadata_path ON image_metadata(path);
            ",
        )?;
        Ok(())
    }

    /// Path of the backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ScanError> {
        self.conn
            .lock()
            .map_err(|_| ScanError::database_error("metadata store lock poisoned"))
    }

    /// Look up cached metadata for many paths
    ///
    /// Paths absent from the result were never cached. Failing chunks are
    /// logged and skipped, so the result may be partial.
    pub fn get_batch(&self, paths: &[String]) -> HashMap<String, CachedMetadata> {
        let mut results = HashMap::new();
        if paths.is_empty() {
            return results;
        }

        let conn = match self.lock() {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Metadata lookup skipped: {}", e);
                return results;
            }
        };

        for chunk in paths.chunks(MAX_QUERY_PARAMS) {
            if let Err(e) = query_chunk(&conn, chunk, &mut results) {
                warn!("Metadata lookup failed for {} paths: {}", chunk.len(), e);
            }
        }
        results
    }

    /// Look up cached metadata, failing on the first backend error
    pub fn try_get_batch(
        &self,
        paths: &[String],
    ) -> Result<HashMap<String, CachedMetadata>, ScanError> {
        let mut results = HashMap::new();
        if paths.is_empty() {
            return Ok(results);
        }
        let conn = self.lock()?;
        for chunk in paths.chunks(MAX_QUERY_PARAMS) {
            query_chunk(&conn, chunk, &mut results)?;
        }
        Ok(results)
    }

    /// Upsert records keyed by path; failures are logged, never returned
    pub fn put_batch(&self, records: &[ImageRecord]) {
        if records.is_empty() {
            return;
        }
        if let Err(e) = self.try_put_batch(records) {
            warn!("Failed to save {} metadata records: {}", records.len(), e);
        }
    }

    /// Upsert records keyed by path, returning how many were written
    ///
    /// Invalid records are skipped with a warning; the rest are written in
    /// one transaction.
    pub fn try_put_batch(&self, records: &[ImageRecord]) -> Result<usize, ScanError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO image_metadata (path, width, height, size, mtime)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for record in records {
                if !record.is_valid() {
                    warn!("Rejected invalid metadata record: {:?}", record);
                    continue;
                }
                stmt.execute(params![
                    record.path,
                    record.width,
                    record.height,
                    record.size as i64,
                    record.mtime,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Get record count
    pub fn record_count(&self) -> Result<u64, ScanError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM image_metadata", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete entries by path
    pub fn delete_paths(&self, paths: &[String]) -> Result<usize, ScanError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM image_metadata WHERE path = ?1")?;
            for path in paths {
                deleted += stmt.execute(params![path])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Drop entries whose file no longer exists
    pub fn prune_missing(&self) -> Result<usize, ScanError> {
        let all_paths: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare("SELECT path FROM image_metadata")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let missing: Vec<String> = all_paths
            .into_iter()
            .filter(|p| !Path::new(p).exists())
            .collect();
        self.delete_paths(&missing)
    }

    /// Remove every entry, returning how many were removed
    pub fn clear(&self) -> Result<u64, ScanError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM image_metadata", [])?;
        Ok(removed as u64)
    }
}

fn query_chunk(
    conn: &Connection,
    chunk: &[String],
    results: &mut HashMap<String, CachedMetadata>,
) -> Result<(), ScanError> {
    let placeholders = vec!["?"; chunk.len()].join(",");
    let sql = format!(
        "SELECT path, width, height, size, mtime FROM image_metadata WHERE path IN ({})",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            CachedMetadata {
                width: row.get(1)?,
                height: row.get(2)?,
                size: row.get::<_, i64>(3)? as u64,
                mtime: row.get(4)?,
            },
        ))
    })?;

    for row in rows {
        let (path, metadata) = row?;
        results.insert(path, metadata);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(path: &str, width: u32, height: u32) -> ImageRecord {
        ImageRecord::new(path, width, height, 100, 1000.0)
    }

    #[test]
    fn test_empty_inputs() {
        let store = MetadataStore::open_memory().unwrap();
        assert!(store.get_batch(&[]).is_empty());
        store.put_batch(&[]);
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn test_put_then_get() {
        let store = MetadataStore::open_memory().unwrap();
        store.put_batch(&[record("/p/a.jpg", 400, 300), record("/p/b.png", 10, 20)]);

        let found = store.get_batch(&[
            "/p/a.jpg".to_string(),
            "/p/b.png".to_string(),
            "/p/missing.gif".to_string(),
        ]);
        assert_eq!(found.len(), 2);
        assert_eq!(found["/p/a.jpg"].width, 400);
        assert_eq!(found["/p/a.jpg"].height, 300);
        assert_eq!(found["/p/b.png"].size, 100);
        assert!(!found.contains_key("/p/missing.gif"));
    }

    #[test]
    fn test_upsert_last_writer_wins() {
        let store = MetadataStore::open_memory().unwrap();
        store.put_batch(&[record("/p/a.jpg", 400, 300)]);
        store.put_batch(&[ImageRecord::new("/p/a.jpg", 600, 400, 222, 2000.5)]);

        let found = store.get_batch(&["/p/a.jpg".to_string()]);
        let entry = found["/p/a.jpg"];
        assert_eq!((entry.width, entry.height), (600, 400));
        assert_eq!(entry.size, 222);
        assert_eq!(entry.mtime, 2000.5);
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn test_get_batch_chunks_large_inputs() {
        let store = MetadataStore::open_memory().unwrap();
        let records: Vec<ImageRecord> = (0..2500)
            .map(|i| record(&format!("/big/{:05}.jpg", i), i + 1, 7))
            .collect();
        assert_eq!(store.try_put_batch(&records).unwrap(), 2500);

        let mut paths: Vec<String> = records.iter().map(|r| r.path.clone()).collect();
        paths.push("/big/not-there.jpg".to_string());

        let found = store.get_batch(&paths);
        assert_eq!(found.len(), 2500);
        assert_eq!(found["/big/02499.jpg"].width, 2500);
    }

    #[test]
    fn test_invalid_records_rejected() {
        let store = MetadataStore::open_memory().unwrap();
        let written = store
            .try_put_batch(&[
                ImageRecord::new("", 1, 1, 1, 1.0),
                ImageRecord::new("/p/zero.jpg", 0, 5, 1, 1.0),
                record("/p/ok.jpg", 5, 5),
            ])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("cache.db");

        {
            let store = MetadataStore::open(&db_path).unwrap();
            store.put_batch(&[record("/p/a.jpg", 40, 30)]);
            assert_eq!(store.path(), Some(db_path.as_path()));
        }

        let reopened = MetadataStore::open(&db_path).unwrap();
        let found = reopened.get_batch(&["/p/a.jpg".to_string()]);
        assert_eq!(found["/p/a.jpg"].width, 40);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let store = std::sync::Arc::new(MetadataStore::open_memory().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let path = format!("/t{}/{}.jpg", t, i);
                        store.put_batch(&[record(&path, 1 + i, 1)]);
                        assert!(store.get_batch(&[path]).len() == 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.record_count().unwrap(), 200);
    }

    #[test]
    fn test_delete_prune_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("present.jpg");
        std::fs::write(&existing, b"x").unwrap();
        let existing_key = crate::models::normalize_path(&existing);

        let store = MetadataStore::open_memory().unwrap();
        store.put_batch(&[
            record(&existing_key, 1, 1),
            record("/gone/a.jpg", 1, 1),
            record("/gone/b.jpg", 1, 1),
        ]);

        assert_eq!(store.delete_paths(&["/gone/a.jpg".to_string()]).unwrap(), 1);
        assert_eq!(store.prune_missing().unwrap(), 1);
        assert_eq!(store.record_count().unwrap(), 1);
        assert_eq!(store.get_batch(&[existing_key]).len(), 1);

        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn test_broken_backend_degrades_to_empty() {
        let store = MetadataStore::open_memory().unwrap();
        store.put_batch(&[record("/p/a.jpg", 1, 1)]);
        store
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE image_metadata")
            .unwrap();

        assert!(store.get_batch(&["/p/a.jpg".to_string()]).is_empty());
        assert!(store.try_get_batch(&["/p/a.jpg".to_string()]).is_err());
        // Must not panic or propagate.
        store.put_batch(&[record("/p/b.jpg", 1, 1)]);
        assert!(store.try_put_batch(&[record("/p/b.jpg", 1, 1)]).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            entries in proptest::collection::hash_map(
                "/[a-z]{1,8}/[a-z0-9]{1,12}\\.(jpg|png)",
                (1u32..20_000, 1u32..20_000, 0u64..1_000_000_000, 0.0f64..2_000_000_000.0),
                1..40,
            )
        ) {
            let store = MetadataStore::open_memory().unwrap();
            let records: Vec<ImageRecord> = entries
                .iter()
                .map(|(p, (w, h, s, m))| ImageRecord::new(p.clone(), *w, *h, *s, *m))
                .collect();
            store.put_batch(&records);

            let paths: Vec<String> = entries.keys().cloned().collect();
            let found = store.get_batch(&paths);
            prop_assert_eq!(found.len(), records.len());
            for r in &records {
                let cached = found[&r.path];
                prop_assert!(cached.is_fresh(r.size, r.mtime, 0.01));
                prop_assert_eq!((cached.width, cached.height), (r.width, r.height));
            }
        }
    }
}
