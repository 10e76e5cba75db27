//! Row types read from the scores table.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Processing state of a combination row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Scores are stored; never evaluated again.
    Scored,
    /// Evaluation failed and the failure text is stored.
    Failed,
    /// Not evaluated yet.
    Pending,
}

/// One combination row of the `scores` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub id: i64,
    pub emodel: String,
    pub morph_dir: String,
    pub morph_filename: String,
    /// Serialized score mapping (JSON), `None` until evaluated.
    pub scores: Option<String>,
    /// Failure diagnostics of the last evaluation attempt.
    pub exception: Option<String>,
}

impl ScoreRow {
    /// Parse a row from the database.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            emodel: row.get("emodel")?,
            morph_dir: row.get("morph_dir")?,
            morph_filename: row.get("morph_filename")?,
            scores: row.get("scores")?,
            exception: row.get("exception")?,
        })
    }

    pub fn state(&self) -> RowState {
        match (&self.scores, &self.exception) {
            (Some(_), _) => RowState::Scored,
            (None, Some(_)) => RowState::Failed,
            (None, None) => RowState::Pending,
        }
    }

    /// Morphology file location as stored (may be relative to the working directory).
    pub fn morphology_path(&self) -> PathBuf {
        Path::new(&self.morph_dir).join(&self.morph_filename)
    }
}

/// Aggregate state of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total: u64,
    pub scored: u64,
    pub failed: u64,
    pub pending: u64,
}

impl StoreSummary {
    /// True when nothing is left to evaluate and nothing failed.
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(scores: Option<&str>, exception: Option<&str>) -> ScoreRow {
        ScoreRow {
            id: 1,
            emodel: "cADpyr_L5PC".to_string(),
            morph_dir: "morphs".to_string(),
            morph_filename: "C060114A5.asc".to_string(),
            scores: scores.map(String::from),
            exception: exception.map(String::from),
        }
    }

    #[test]
    fn test_row_state() {
        assert_eq!(row(None, None).state(), RowState::Pending);
        assert_eq!(row(None, Some("boom")).state(), RowState::Failed);
        assert_eq!(row(Some("{}"), None).state(), RowState::Scored);
        // Scores win over a stale failure marker
        assert_eq!(row(Some("{}"), Some("boom")).state(), RowState::Scored);
    }

    #[test]
    fn test_morphology_path_joins_dir_and_file() {
        assert_eq!(
            row(None, None).morphology_path(),
            PathBuf::from("morphs/C060114A5.asc")
        );
    }

    #[test]
    fn test_summary_complete() {
        let done = StoreSummary {
            total: 3,
            scored: 3,
            failed: 0,
            pending: 0,
        };
        assert!(done.is_complete());

        let with_failure = StoreSummary {
            failed: 1,
            scored: 2,
            ..done
        };
        assert!(!with_failure.is_complete());
    }
}
