use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use floodcam_node::{CompletedObject, ObjectStore, PersistenceError, RecordId};
use rusqlite::{params, Connection, OptionalExtension};

/// Summary row of one stored image, without the blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub id: i64,
    pub session_id: i64,
    pub variant: String,
    pub actual_size: i64,
    pub source: String,
    pub device_id: Option<String>,
    pub reason: Option<String>,
    pub digest: String,
    pub stored_at: i64,
}

/// One row per image. Re-storing the same bytes under the same key returns
/// the existing row.
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
}

fn backend(context: &str, err: rusqlite::Error) -> PersistenceError {
    PersistenceError::Backend(format!("{context}: {err}"))
}

impl SqliteObjectStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(PersistenceError::Write)?;
        }
        let conn = Connection::open(path).map_err(|e| backend("open image db", e))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(|e| backend("open image db", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS images (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               session_id INTEGER NOT NULL,
               variant TEXT NOT NULL,
               total_size INTEGER NOT NULL,
               actual_size INTEGER NOT NULL,
               contiguous INTEGER NOT NULL,
               source TEXT NOT NULL,
               device_id TEXT,
               reason TEXT,
               width INTEGER,
               height INTEGER,
               format INTEGER,
               difference_percent REAL,
               filename TEXT NOT NULL,
               digest TEXT NOT NULL,
               data BLOB NOT NULL,
               stored_at INTEGER NOT NULL,
               UNIQUE (session_id, variant, digest)
             );
             CREATE INDEX IF NOT EXISTS images_by_session ON images (session_id, variant);",
        )
        .map_err(|e| backend("init image db", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn count(&self) -> Result<u64, PersistenceError> {
        self.conn()
            .query_row("SELECT COUNT(*) FROM images", [], |r| r.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(|e| backend("count", e))
    }

    /// Most recently stored images first.
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredImage>, PersistenceError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, variant, actual_size, source, device_id, reason,
                        digest, stored_at
                 FROM images ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| backend("recent prepare", e))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(StoredImage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    variant: row.get(2)?,
                    actual_size: row.get(3)?,
                    source: row.get(4)?,
                    device_id: row.get(5)?,
                    reason: row.get(6)?,
                    digest: row.get(7)?,
                    stored_at: row.get(8)?,
                })
            })
            .map_err(|e| backend("recent query", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| backend("recent row", e))?);
        }
        Ok(out)
    }

    /// Image bytes for a stored row.
    pub fn load(&self, id: i64) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.conn()
            .query_row("SELECT data FROM images WHERE id=?1", [id], |r| r.get(0))
            .optional()
            .map_err(|e| backend("load", e))
    }
}

impl ObjectStore for SqliteObjectStore {
    fn store(&self, object: &CompletedObject) -> Result<RecordId, PersistenceError> {
        let session_id = i64::try_from(object.key.session.0).map_err(|_| {
            PersistenceError::Backend(format!("session id {} out of range", object.key.session))
        })?;
        let digest = hex::encode(object.digest);
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO images (
               session_id, variant, total_size, actual_size, contiguous, source,
               device_id, reason, width, height, format, difference_percent,
               filename, digest, data, stored_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                session_id,
                object.key.variant.as_tag(),
                object.total_size,
                object.actual_size,
                object.contiguous,
                object.source.label(),
                object.tags.device,
                object.tags.reason,
                object.tags.width,
                object.tags.height,
                object.tags.format,
                object.tags.difference,
                object.file_name(),
                digest,
                object.bytes,
                now_secs(),
            ],
        )
        .map_err(|e| backend("insert image", e))?;
        let id: i64 = conn
            .query_row(
                "SELECT id FROM images WHERE session_id=?1 AND variant=?2 AND digest=?3",
                params![session_id, object.key.variant.as_tag(), digest],
                |r| r.get(0),
            )
            .map_err(|e| backend("lookup image", e))?;
        Ok(RecordId(format!("images/{id}")))
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
