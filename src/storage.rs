use rusqlite::{params, Connection, OpenFlags};

use crate::error::PipelineError;

/// One persisted detection row.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: String,
    pub label: String,
    pub confidence: f64,
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

/// A detection row before the store assigns its id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLogEntry {
    pub timestamp: String,
    pub label: String,
    pub confidence: f64,
    pub corners: [i64; 4],
}

/// Append-only detection log.
///
/// Each `append` is a single self-contained write. Entries are never
/// updated or deleted.
pub trait DetectionLog: Send {
    /// Append one entry and return its store-assigned id.
    fn append(&mut self, entry: &NewLogEntry) -> Result<i64, PipelineError>;

    /// All entries in insertion order.
    fn entries(&self) -> Result<Vec<LogEntry>, PipelineError>;

    fn count(&self) -> Result<u64, PipelineError>;
}

pub struct SqliteDetectionLog {
    conn: Connection,
}

impl SqliteDetectionLog {
    /// Open (creating if needed) the database and ensure the schema exists.
    pub fn open(db_path: &str) -> Result<Self, PipelineError> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open an existing database without write access.
    pub fn open_read_only(db_path: &str) -> Result<Self, PipelineError> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if db_path.starts_with("file:") {
            flags |= OpenFlags::SQLITE_OPEN_URI;
        }
        let conn = Connection::open_with_flags(db_path, flags)?;
        Ok(Self { conn })
    }

    /// Create the detection table if absent. Safe to call repeatedly.
    pub fn ensure_schema(&mut self) -> Result<(), PipelineError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp DATETIME,
              label TEXT,
              confidence REAL,
              x1 INTEGER, y1 INTEGER, x2 INTEGER, y2 INTEGER
            );
            "#,
        )?;
        Ok(())
    }
}

impl DetectionLog for SqliteDetectionLog {
    fn append(&mut self, entry: &NewLogEntry) -> Result<i64, PipelineError> {
        let [x1, y1, x2, y2] = entry.corners;
        self.conn.execute(
            r#"
            INSERT INTO detection_log(timestamp, label, confidence, x1, y1, x2, y2)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![entry.timestamp, entry.label, entry.confidence, x1, y1, x2, y2],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn entries(&self) -> Result<Vec<LogEntry>, PipelineError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, label, confidence, x1, y1, x2, y2 FROM detection_log ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LogEntry {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                label: row.get(2)?,
                confidence: row.get(3)?,
                x1: row.get(4)?,
                y1: row.get(5)?,
                x2: row.get(6)?,
                y2: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count(&self) -> Result<u64, PipelineError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detection_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// In-memory log with the same id semantics as the SQLite store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionLog {
    entries: Vec<LogEntry>,
    next_id: i64,
}

impl DetectionLog for InMemoryDetectionLog {
    fn append(&mut self, entry: &NewLogEntry) -> Result<i64, PipelineError> {
        self.next_id += 1;
        let [x1, y1, x2, y2] = entry.corners;
        self.entries.push(LogEntry {
            id: self.next_id,
            timestamp: entry.timestamp.clone(),
            label: entry.label.clone(),
            confidence: entry.confidence,
            x1,
            y1,
            x2,
            y2,
        });
        Ok(self.next_id)
    }

    fn entries(&self) -> Result<Vec<LogEntry>, PipelineError> {
        Ok(self.entries.clone())
    }

    fn count(&self) -> Result<u64, PipelineError> {
        Ok(self.entries.len() as u64)
    }
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection, PipelineError> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}
