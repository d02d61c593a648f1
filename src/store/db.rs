//! Store trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StoreError;
use super::schema;
use super::types::{
    Category, FileProgress, FileRecord, Link, LinkStatus, NewFile, ProgressWrite, StoreSummary,
};

const LINK_COLUMNS: &str = "id, url, category, status, worker_id, message, created_at";

const FILE_COLUMNS: &str = "id, link_id, path, handle, total_bytes, transferred_bytes, \
     num_retry, max_retries, mean_speed, start_time, is_processing, is_finished, state";

/// Durable storage for links, files and categories.
///
/// Object-safe so it can be shared as `Arc<dyn Store>`. Every call is a
/// short, self-contained unit of work. Long-lived tasks that write
/// concurrently with the processor should hold their own
/// [`Store::session`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Open an independent session on the same database.
    async fn session(&self) -> Result<Arc<dyn Store>, StoreError>;

    /// Insert a link, or return the existing row when the URL is already
    /// known.
    async fn add_link(&self, url: &str, category: Option<&str>) -> Result<Link, StoreError>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>, StoreError>;

    /// All links in submission order.
    async fn list_links(&self) -> Result<Vec<Link>, StoreError>;

    /// Delete a link and every file it owns.
    ///
    /// Returns false when no such link exists.
    async fn delete_link(&self, id: i64) -> Result<bool, StoreError>;

    /// Links `worker_id` may claim, oldest first: idle links plus those
    /// already claimed by the same worker.
    async fn claimable_links(&self, worker_id: &str) -> Result<Vec<Link>, StoreError>;

    /// Atomically claim a link for `worker_id`.
    ///
    /// Succeeds only if the link is still idle or already claimed by the
    /// same worker. Returns whether the claim was taken.
    async fn claim_link(&self, id: i64, worker_id: &str) -> Result<bool, StoreError>;

    /// Overwrite a link's status, stamping it with `worker_id`.
    async fn update_link_status(
        &self,
        id: i64,
        worker_id: &str,
        status: LinkStatus,
        message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Return `processing` links held by any other worker to `idle`.
    ///
    /// Returns the number of links released.
    async fn release_foreign_claims(&self, worker_id: &str) -> Result<u64, StoreError>;

    /// Insert a file, or return the existing row for the same
    /// `(link_id, handle)`.
    async fn create_file(&self, file: &NewFile) -> Result<FileRecord, StoreError>;

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError>;

    /// Files in discovery order, optionally restricted to one link.
    async fn list_files(&self, link_id: Option<i64>) -> Result<Vec<FileRecord>, StoreError>;

    /// Number of files of a link that have not finished.
    async fn count_unfinished_files(&self, link_id: i64) -> Result<u64, StoreError>;

    /// Mark a file as not downloaded and discard its transfer progress.
    async fn reset_file(&self, id: i64) -> Result<(), StoreError>;

    async fn set_file_processing(&self, id: i64, processing: bool) -> Result<(), StoreError>;

    /// Clear every `is_processing` flag. Returns the number of files touched.
    async fn clear_processing_flags(&self) -> Result<u64, StoreError>;

    /// Overwrite the progress columns of a file with a snapshot.
    ///
    /// A finished file is never modified.
    async fn record_progress(
        &self,
        id: i64,
        progress: &FileProgress,
    ) -> Result<ProgressWrite, StoreError>;

    /// Insert a category, or return the existing one with the same name.
    async fn create_category(&self, name: &str) -> Result<Category, StoreError>;

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn summary(&self) -> Result<StoreSummary, StoreError>;
}

/// SQLite implementation of the store.
pub struct SqliteStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "foreign_keys", "ON")
                .map_err(StoreError::Migration)?;
            // Sessions share the file; wait for each other's write locks.
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(StoreError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }
}

/// Run `f` inside a transaction, rolling back on error.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
        .map_err(StoreError::query)?;

    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", []).map_err(StoreError::query)?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

fn count(conn: &Connection, sql: &str) -> Result<u64, StoreError> {
    let n: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(StoreError::query)?;
    Ok(n as u64)
}

#[async_trait]
impl Store for SqliteStore {
    async fn session(&self) -> Result<Arc<dyn Store>, StoreError> {
        Ok(Arc::new(SqliteStore::open(&self.path).await?))
    }

    async fn add_link(&self, url: &str, category: Option<&str>) -> Result<Link, StoreError> {
        let conn = self.conn()?;
        let created_at = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO links (url, category, status, worker_id, created_at) \
             VALUES (?1, ?2, 'idle', '', ?3) ON CONFLICT(url) DO NOTHING",
            rusqlite::params![url, category, created_at],
        )
        .map_err(StoreError::query)?;

        conn.query_row(
            &format!("SELECT {LINK_COLUMNS} FROM links WHERE url = ?1"),
            [url],
            row_to_link,
        )
        .map_err(StoreError::query)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?1"),
            [id],
            row_to_link,
        )
        .optional()
        .map_err(StoreError::query)
    }

    async fn list_links(&self) -> Result<Vec<Link>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {LINK_COLUMNS} FROM links ORDER BY id"))
            .map_err(StoreError::query)?;
        let links = stmt
            .query_map([], row_to_link)
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(links)
    }

    async fn delete_link(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        in_transaction(&conn, |conn| {
            conn.execute("DELETE FROM files WHERE link_id = ?1", [id])
                .map_err(StoreError::query)?;
            let deleted = conn
                .execute("DELETE FROM links WHERE id = ?1", [id])
                .map_err(StoreError::query)?;
            Ok(deleted > 0)
        })
    }

    async fn claimable_links(&self, worker_id: &str) -> Result<Vec<Link>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LINK_COLUMNS} FROM links \
                 WHERE status = 'idle' OR (status = 'processing' AND worker_id = ?1) \
                 ORDER BY id"
            ))
            .map_err(StoreError::query)?;
        let links = stmt
            .query_map([worker_id], row_to_link)
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(links)
    }

    async fn claim_link(&self, id: i64, worker_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE links SET status = 'processing', worker_id = ?2, message = NULL \
                 WHERE id = ?1 AND (status = 'idle' OR (status = 'processing' AND worker_id = ?2))",
                rusqlite::params![id, worker_id],
            )
            .map_err(StoreError::query)?;
        Ok(updated == 1)
    }

    async fn update_link_status(
        &self,
        id: i64,
        worker_id: &str,
        status: LinkStatus,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE links SET status = ?2, worker_id = ?3, message = ?4 WHERE id = ?1",
            rusqlite::params![id, status.as_str(), worker_id, message],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    async fn release_foreign_claims(&self, worker_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let released = conn
            .execute(
                "UPDATE links SET status = 'idle' WHERE status = 'processing' AND worker_id != ?1",
                [worker_id],
            )
            .map_err(StoreError::query)?;
        Ok(released as u64)
    }

    async fn create_file(&self, file: &NewFile) -> Result<FileRecord, StoreError> {
        let conn = self.conn()?;
        in_transaction(&conn, |conn| {
            conn.execute(
                "INSERT INTO files (link_id, path, handle, total_bytes) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(link_id, handle) DO NOTHING",
                rusqlite::params![
                    file.link_id,
                    file.path.to_string_lossy(),
                    &file.handle,
                    file.total_bytes as i64,
                ],
            )
            .map_err(StoreError::query)?;

            conn.query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE link_id = ?1 AND handle = ?2"),
                rusqlite::params![file.link_id, &file.handle],
                row_to_file,
            )
            .map_err(StoreError::query)
        })
    }

    async fn get_file(&self, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
            [id],
            row_to_file,
        )
        .optional()
        .map_err(StoreError::query)
    }

    async fn list_files(&self, link_id: Option<i64>) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE ?1 IS NULL OR link_id = ?1 ORDER BY id"
            ))
            .map_err(StoreError::query)?;
        let files = stmt
            .query_map([link_id], row_to_file)
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(files)
    }

    async fn count_unfinished_files(&self, link_id: i64) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM files WHERE link_id = ?1 AND is_finished = 0",
                [link_id],
                |row| row.get(0),
            )
            .map_err(StoreError::query)?;
        Ok(n as u64)
    }

    async fn reset_file(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET is_finished = 0, is_processing = 0, transferred_bytes = 0, \
             mean_speed = 0, state = NULL WHERE id = ?1",
            [id],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    async fn set_file_processing(&self, id: i64, processing: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE files SET is_processing = ?2 WHERE id = ?1",
            rusqlite::params![id, processing],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    async fn clear_processing_flags(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let cleared = conn
            .execute(
                "UPDATE files SET is_processing = 0 WHERE is_processing = 1",
                [],
            )
            .map_err(StoreError::query)?;
        Ok(cleared as u64)
    }

    async fn record_progress(
        &self,
        id: i64,
        progress: &FileProgress,
    ) -> Result<ProgressWrite, StoreError> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE files SET transferred_bytes = ?2, total_bytes = ?3, num_retry = ?4, \
                 max_retries = ?5, mean_speed = ?6, start_time = ?7, state = ?8, is_finished = ?9 \
                 WHERE id = ?1 AND is_finished = 0",
                rusqlite::params![
                    id,
                    progress.transferred_bytes as i64,
                    progress.total_bytes as i64,
                    progress.num_retry,
                    progress.max_retries,
                    progress.mean_speed as i64,
                    progress.start_time.timestamp(),
                    progress.state,
                    progress.finished,
                ],
            )
            .map_err(StoreError::query)?;

        if updated > 0 {
            return Ok(ProgressWrite::Applied);
        }

        let exists = conn
            .query_row("SELECT 1 FROM files WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map_err(StoreError::query)?
            .is_some();

        Ok(if exists {
            ProgressWrite::AlreadyFinished
        } else {
            ProgressWrite::Missing
        })
    }

    async fn create_category(&self, name: &str) -> Result<Category, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
            [name],
        )
        .map_err(StoreError::query)?;
        conn.query_row(
            "SELECT id, name FROM categories WHERE name = ?1",
            [name],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .map_err(StoreError::query)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name FROM categories ORDER BY name")
            .map_err(StoreError::query)?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;
        Ok(categories)
    }

    async fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.conn()?;

        let (transferred_bytes, total_bytes): (i64, i64) = conn
            .query_row(
                "SELECT COALESCE(SUM(transferred_bytes), 0), COALESCE(SUM(total_bytes), 0) FROM files",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::query)?;

        Ok(StoreSummary {
            links_idle: count(&conn, "SELECT COUNT(*) FROM links WHERE status = 'idle'")?,
            links_processing: count(
                &conn,
                "SELECT COUNT(*) FROM links WHERE status = 'processing'",
            )?,
            links_done: count(&conn, "SELECT COUNT(*) FROM links WHERE status = 'done'")?,
            links_error: count(&conn, "SELECT COUNT(*) FROM links WHERE status = 'error'")?,
            files_total: count(&conn, "SELECT COUNT(*) FROM files")?,
            files_finished: count(&conn, "SELECT COUNT(*) FROM files WHERE is_finished = 1")?,
            files_downloading: count(
                &conn,
                "SELECT COUNT(*) FROM files WHERE is_processing = 1 AND is_finished = 0",
            )?,
            transferred_bytes: transferred_bytes as u64,
            total_bytes: total_bytes as u64,
        })
    }
}

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    let status: String = row.get(3)?;
    Ok(Link {
        id: row.get(0)?,
        url: row.get(1)?,
        category: row.get(2)?,
        status: LinkStatus::from_str(&status).unwrap_or(LinkStatus::Idle),
        worker_id: row.get(4)?,
        message: row.get(5)?,
        created_at: timestamp_to_utc(row.get(6)?),
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(2)?;
    let total_bytes: i64 = row.get(4)?;
    let transferred_bytes: i64 = row.get(5)?;
    let mean_speed: i64 = row.get(8)?;
    let start_time: Option<i64> = row.get(9)?;
    Ok(FileRecord {
        id: row.get(0)?,
        link_id: row.get(1)?,
        path: PathBuf::from(path),
        handle: row.get(3)?,
        total_bytes: total_bytes as u64,
        transferred_bytes: transferred_bytes as u64,
        num_retry: row.get(6)?,
        max_retries: row.get(7)?,
        mean_speed: mean_speed as u64,
        start_time: start_time.map(timestamp_to_utc),
        is_processing: row.get(10)?,
        is_finished: row.get(11)?,
        state: row.get(12)?,
    })
}
