//! SQLite cache for song analysis results
//!
//! Tempo analysis takes seconds per song; the cache keyed by path, size and
//! modification time makes every later load of an unchanged file instant.

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cached analysis for one song file.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub path: PathBuf,
    /// File size in bytes, for invalidation.
    pub file_size: u64,
    /// Modification time as Unix seconds, for invalidation.
    pub modified_time: u64,
    pub duration_secs: f64,
    /// Detected tempo.
    pub bpm: f64,
    /// Samples to the first downbeat.
    pub offset_samples: i64,
}

/// Analysis cache backed by SQLite.
pub struct AnalysisCache {
    conn: Connection,
}

impl AnalysisCache {
    const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS songs (
            id INTEGER PRIMARY KEY,
            path TEXT UNIQUE NOT NULL,
            file_size INTEGER NOT NULL,
            modified_time INTEGER NOT NULL,
            duration_secs REAL NOT NULL,
            bpm REAL NOT NULL,
            offset_samples INTEGER NOT NULL,
            analyzed_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_songs_path ON songs(path);
    "#;

    /// Open or create a cache database.
    pub fn open(db_path: &Path) -> Result<AnalysisCache, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(AnalysisCache { conn })
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<AnalysisCache, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(AnalysisCache { conn })
    }

    /// Fetch a cached analysis, but only when size and mtime still match.
    pub fn get(&self, path: &Path, file_size: u64, modified_time: u64) -> Option<CachedAnalysis> {
        self.conn
            .query_row(
                "SELECT path, file_size, modified_time, duration_secs, bpm, offset_samples
                 FROM songs
                 WHERE path = ?1 AND file_size = ?2 AND modified_time = ?3",
                params![path.to_string_lossy().to_string(), file_size, modified_time],
                |row| {
                    Ok(CachedAnalysis {
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        file_size: row.get(1)?,
                        modified_time: row.get(2)?,
                        duration_secs: row.get(3)?,
                        bpm: row.get(4)?,
                        offset_samples: row.get(5)?,
                    })
                },
            )
            .ok()
    }

    /// Insert or replace the analysis for a path.
    pub fn store(&self, analysis: &CachedAnalysis) -> Result<(), CacheError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.conn.execute(
            "INSERT OR REPLACE INTO songs
             (path, file_size, modified_time, duration_secs, bpm, offset_samples, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                analysis.path.to_string_lossy().to_string(),
                analysis.file_size,
                analysis.modified_time,
                analysis.duration_secs,
                analysis.bpm,
                analysis.offset_samples,
                now,
            ],
        )?;
        Ok(())
    }

    /// Number of cached songs.
    pub fn count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CachedAnalysis {
        CachedAnalysis {
            path: PathBuf::from("/music/a - b.mp3"),
            file_size: 4_200_000,
            modified_time: 1_700_000_000,
            duration_secs: 212.4,
            bpm: 128.0,
            offset_samples: 13_440,
        }
    }

    #[test]
    fn test_store_and_get() {
        let cache = AnalysisCache::in_memory().unwrap();
        let analysis = sample();
        cache.store(&analysis).unwrap();

        let hit = cache
            .get(&analysis.path, analysis.file_size, analysis.modified_time)
            .unwrap();
        assert_eq!(hit.bpm, 128.0);
        assert_eq!(hit.offset_samples, 13_440);
    }

    #[test]
    fn test_size_change_invalidates() {
        let cache = AnalysisCache::in_memory().unwrap();
        let analysis = sample();
        cache.store(&analysis).unwrap();
        assert!(cache
            .get(&analysis.path, analysis.file_size + 1, analysis.modified_time)
            .is_none());
    }

    #[test]
    fn test_mtime_change_invalidates() {
        let cache = AnalysisCache::in_memory().unwrap();
        let analysis = sample();
        cache.store(&analysis).unwrap();
        assert!(cache
            .get(&analysis.path, analysis.file_size, analysis.modified_time + 1)
            .is_none());
    }

    #[test]
    fn test_store_replaces_existing() {
        let cache = AnalysisCache::in_memory().unwrap();
        let mut analysis = sample();
        cache.store(&analysis).unwrap();

        analysis.bpm = 140.0;
        cache.store(&analysis).unwrap();

        assert_eq!(cache.count().unwrap(), 1);
        let hit = cache
            .get(&analysis.path, analysis.file_size, analysis.modified_time)
            .unwrap();
        assert_eq!(hit.bpm, 140.0);
    }
}
