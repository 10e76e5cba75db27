//! Scores database: the pending-work store of a run.
//!
//! The `scores` table is created by the combination preparation step. This
//! module only reads rows and writes back single-row results, so an
//! interrupted run leaves every collected result durably stored and the
//! still-pending rows untouched.

pub mod queries;

use crate::engine::task::{ComboId, Scores};
use crate::error::{MmError, Result};
use queries::{ScoreRow, StoreSummary};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// How long SQLite retries on a locked database before returning SQLITE_BUSY.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 30;

/// Connection to a scores database.
pub struct ScoresDb {
    conn: Connection,
}

impl ScoresDb {
    /// Open an existing scores database.
    ///
    /// Fails when the file is missing or has no `scores` table. Adds the
    /// `exception` column on databases that predate failure tracking.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MmError::InvalidPath(format!(
                "scores database '{}' does not exist",
                path.display()
            )));
        }
        if path.is_dir() {
            return Err(MmError::InvalidPath(format!(
                "'{}' is a directory, not a scores database",
                path.display()
            )));
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS))?;

        let db = Self { conn };
        if !db.has_table("scores")? {
            return Err(MmError::MissingScoresTable(path.display().to_string()));
        }
        db.migrate_if_needed()?;
        Ok(db)
    }

    fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |row| row.get(0),
        )?)
    }

    fn migrate_if_needed(&self) -> Result<()> {
        let has_exception: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('scores') WHERE name='exception'",
            [],
            |row| row.get(0),
        )?;

        if !has_exception {
            debug!("Adding exception column to scores table");
            self.conn
                .execute("ALTER TABLE scores ADD COLUMN exception TEXT", [])?;
        }
        Ok(())
    }

    /// Read every combination row, ordered by id.
    #[instrument(skip(self))]
    pub fn load_rows(&self) -> Result<Vec<ScoreRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, emodel, morph_dir, morph_filename, scores, exception FROM scores ORDER BY id",
        )?;
        let rows = stmt.query_map([], ScoreRow::from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Store the scores of one combination and clear any earlier failure.
    pub fn save_scores(&self, id: ComboId, scores: &Scores) -> Result<()> {
        let json = serde_json::to_string(scores)?;
        let updated = self
            .conn
            .execute(
                "UPDATE scores SET scores = ?1, exception = NULL WHERE id = ?2",
                params![json, id],
            )
            .map_err(|source| MmError::Persist { id, source })?;
        if updated == 0 {
            warn!(id, "No scores row matched while saving scores");
        }
        Ok(())
    }

    /// Record a failed evaluation. Scores stay NULL.
    pub fn save_failure(&self, id: ComboId, message: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE scores SET exception = ?1 WHERE id = ?2",
                params![message, id],
            )
            .map_err(|source| MmError::Persist { id, source })?;
        if updated == 0 {
            warn!(id, "No scores row matched while saving failure");
        }
        Ok(())
    }

    /// Clear failure markers so failed rows become pending again.
    ///
    /// Returns the number of rows reset.
    pub fn reset_failures(&self) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE scores SET exception = NULL WHERE scores IS NULL AND exception IS NOT NULL",
            [],
        )?)
    }

    /// Stored scores of one combination, if any.
    pub fn scores_for(&self, id: ComboId) -> Result<Option<Scores>> {
        let json: Option<Option<String>> = self
            .conn
            .query_row("SELECT scores FROM scores WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;

        match json.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Count scored, failed and pending rows.
    pub fn summary(&self) -> Result<StoreSummary> {
        let (total, scored, failed): (i64, i64, i64) = self.conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(scores IS NOT NULL), 0),
                COALESCE(SUM(scores IS NULL AND exception IS NOT NULL), 0)
            FROM scores
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (total, scored, failed) = (total as u64, scored as u64, failed as u64);
        Ok(StoreSummary {
            total,
            scored,
            failed,
            pending: total - scored - failed,
        })
    }

    /// Get the underlying connection for advanced operations.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rusqlite::Connection;
    use std::path::Path;

    /// Create a scores table in the layout written by the combination preparation step.
    pub fn create_scores_db(path: &Path, rows: &[(i64, &str, &str, &str)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE scores (
                id INTEGER PRIMARY KEY,
                emodel TEXT,
                morph_dir TEXT,
                morph_filename TEXT,
                scores TEXT
            );
            "#,
        )
        .unwrap();
        for (id, emodel, morph_dir, morph_filename) in rows {
            conn.execute(
                "INSERT INTO scores (id, emodel, morph_dir, morph_filename, scores) VALUES (?, ?, ?, ?, NULL)",
                rusqlite::params![id, emodel, morph_dir, morph_filename],
            )
            .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::queries::RowState;
    use super::test_support::create_scores_db;
    use super::*;
    use tempfile::tempdir;

    fn fixture() -> (tempfile::TempDir, ScoresDb) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scores.sqlite");
        create_scores_db(
            &path,
            &[
                (1, "cADpyr_L5PC", "morphs", "a.asc"),
                (2, "cADpyr_L5PC_legacy", "morphs", "b.asc"),
                (3, "cADpyr_L4PC", "morphs", "c.asc"),
            ],
        );
        let db = ScoresDb::open(&path).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let result = ScoresDb::open(dir.path().join("nope.sqlite"));
        assert!(matches!(result, Err(MmError::InvalidPath(_))));
    }

    #[test]
    fn test_open_directory() {
        let dir = tempdir().unwrap();
        let result = ScoresDb::open(dir.path());
        assert!(matches!(result, Err(MmError::InvalidPath(_))));
    }

    #[test]
    fn test_open_without_scores_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (id INTEGER);")
            .unwrap();
        let result = ScoresDb::open(&path);
        assert!(matches!(result, Err(MmError::MissingScoresTable(_))));
    }

    #[test]
    fn test_open_adds_exception_column_once() {
        let (dir, db) = fixture();
        drop(db);
        // Second open must not try to add the column again
        let db = ScoresDb::open(dir.path().join("scores.sqlite")).unwrap();
        let rows = db.load_rows().unwrap();
        assert!(rows.iter().all(|r| r.exception.is_none()));
    }

    #[test]
    fn test_load_rows_ordered() {
        let (_dir, db) = fixture();
        let rows = db.load_rows().unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.state() == RowState::Pending));
    }

    #[test]
    fn test_save_scores_round_trips() {
        let (_dir, db) = fixture();
        let mut scores = Scores::new();
        scores.insert("score_a".to_string(), 1.0);
        scores.insert("score_b".to_string(), 2.5);

        db.save_scores(2, &scores).unwrap();

        assert_eq!(db.scores_for(2).unwrap(), Some(scores));
        assert_eq!(db.scores_for(1).unwrap(), None);
    }

    #[test]
    fn test_save_failure_then_scores_clears_exception() {
        let (_dir, db) = fixture();
        db.save_failure(1, "Traceback: boom").unwrap();

        let row = &db.load_rows().unwrap()[0];
        assert_eq!(row.state(), RowState::Failed);
        assert_eq!(row.exception.as_deref(), Some("Traceback: boom"));

        db.save_scores(1, &Scores::new()).unwrap();
        let row = &db.load_rows().unwrap()[0];
        assert_eq!(row.state(), RowState::Scored);
        assert!(row.exception.is_none());
    }

    #[test]
    fn test_summary_and_reset_failures() {
        let (_dir, db) = fixture();
        db.save_scores(1, &Scores::new()).unwrap();
        db.save_failure(2, "boom").unwrap();

        let summary = db.summary().unwrap();
        assert_eq!(
            summary,
            StoreSummary {
                total: 3,
                scored: 1,
                failed: 1,
                pending: 1,
            }
        );

        assert_eq!(db.reset_failures().unwrap(), 1);
        let summary = db.summary().unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.pending, 2);
    }

    #[test]
    fn test_summary_of_empty_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scores.sqlite");
        create_scores_db(&path, &[]);
        let db = ScoresDb::open(&path).unwrap();
        assert_eq!(db.summary().unwrap(), StoreSummary::default());
    }

    #[test]
    fn test_save_scores_for_unknown_id_is_not_an_error() {
        let (_dir, db) = fixture();
        db.save_scores(99, &Scores::new()).unwrap();
        assert_eq!(db.summary().unwrap().scored, 0);
    }
}
