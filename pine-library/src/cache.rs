//! SQLite cache for upload analysis results
//!
//! Stores BPM, key, and metadata so unchanged files are not analysed twice.

use pine_analysis::MusicalKey;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Size and modification time used to detect changed files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub file_size: u64,
    /// Unix timestamp in seconds
    pub modified_time: u64,
}

impl FileStamp {
    /// Read the stamp of a file on disk
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified_time = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            file_size: meta.len(),
            modified_time,
        })
    }
}

/// Cached analysis result for an upload
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnalysis {
    pub path: PathBuf,
    pub stamp: FileStamp,
    pub title: String,
    pub duration_secs: f64,
    /// Detected BPM (None if the file had no audio)
    pub bpm: Option<u32>,
    /// Detected key (None in quick mode)
    pub key: Option<MusicalKey>,
}

impl CachedAnalysis {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let key: Option<String> = row.get(5)?;
        Ok(Self {
            path: PathBuf::from(row.get::<_, String>(0)?),
            stamp: FileStamp {
                file_size: row.get(1)?,
                modified_time: row.get(2)?,
            },
            title: row.get(3)?,
            duration_secs: row.get(4)?,
            // Unparseable key text reads back as None
            key: key.and_then(|k| k.parse().ok()),
            bpm: row.get(6)?,
        })
    }
}

/// Analysis cache backed by SQLite
pub struct AnalysisCache {
    conn: Connection,
}

impl AnalysisCache {
    /// SQL schema for the uploads table
    const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS uploads (
            id INTEGER PRIMARY KEY,
            path TEXT UNIQUE NOT NULL,
            file_size INTEGER NOT NULL,
            modified_time INTEGER NOT NULL,
            title TEXT NOT NULL,
            duration_secs REAL NOT NULL,
            key TEXT,
            bpm INTEGER,
            analyzed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_path ON uploads(path);
    "#;

    const COLUMNS: &'static str = "path, file_size, modified_time, title, duration_secs, key, bpm";

    /// Open or create a cache database at the given path
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self { conn })
    }

    /// Get cached analysis if the file hasn't changed
    ///
    /// Returns None if the path is unknown or its size or modification time
    /// differ from the stored ones.
    pub fn get(&self, path: &Path, stamp: FileStamp) -> Option<CachedAnalysis> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM uploads
                     WHERE path = ?1 AND file_size = ?2 AND modified_time = ?3",
                    Self::COLUMNS
                ),
                params![
                    path.to_string_lossy().to_string(),
                    stamp.file_size,
                    stamp.modified_time
                ],
                CachedAnalysis::from_row,
            )
            .ok()
    }

    /// Store analysis result in the cache, replacing any row for the same path
    pub fn store(&self, analysis: &CachedAnalysis) -> Result<(), CacheError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        self.conn.execute(
            r#"INSERT OR REPLACE INTO uploads
               (path, file_size, modified_time, title, duration_secs, key, bpm, analyzed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                analysis.path.to_string_lossy().to_string(),
                analysis.stamp.file_size,
                analysis.stamp.modified_time,
                analysis.title,
                analysis.duration_secs,
                analysis.key.map(|k| k.to_string()),
                analysis.bpm,
                now,
            ],
        )?;
        Ok(())
    }

    /// All cached uploads, ordered by path
    pub fn all(&self) -> Result<Vec<CachedAnalysis>, CacheError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM uploads ORDER BY path ASC", Self::COLUMNS))?;

        let rows = stmt
            .query_map([], CachedAnalysis::from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// Get the number of cached uploads
    pub fn count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM uploads", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove an upload from the cache
    pub fn remove(&self, path: &Path) -> Result<bool, CacheError> {
        let affected = self.conn.execute(
            "DELETE FROM uploads WHERE path = ?1",
            [path.to_string_lossy().to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Clear all cached data
    pub fn clear(&self) -> Result<(), CacheError> {
        self.conn.execute("DELETE FROM uploads", [])?;
        Ok(())
    }
}
