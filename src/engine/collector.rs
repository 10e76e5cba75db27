//! Result write-back.

use super::task::{EvaluationResult, Outcome};
use crate::db::ScoresDb;
use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

/// Persists each result as soon as it arrives.
///
/// Writes are single-row and unbuffered: once `collect` returns, the result
/// is durable, so an interrupted run leaves exactly the unfinished rows
/// pending.
pub struct ResultCollector<'a> {
    db: &'a ScoresDb,
    total: usize,
    received: usize,
    scored: usize,
    failed: usize,
    progress: Option<ProgressBar>,
}

impl<'a> ResultCollector<'a> {
    pub fn new(db: &'a ScoresDb, total: usize) -> Self {
        Self {
            db,
            total,
            received: 0,
            scored: 0,
            failed: 0,
            progress: None,
        }
    }

    /// Drive a progress bar alongside the log records.
    pub fn with_progress(mut self) -> Self {
        let pb = ProgressBar::new(self.total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓▒░  "));
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        self.progress = Some(pb);
        self
    }

    /// Persist one result.
    pub fn collect(&mut self, result: EvaluationResult) -> Result<()> {
        match &result.outcome {
            Outcome::Scored { scores } => {
                self.db.save_scores(result.id, scores)?;
                self.scored += 1;
            }
            Outcome::Failed { message } => {
                self.db.save_failure(result.id, message)?;
                self.failed += 1;
                let first_line = message.lines().next().unwrap_or_default();
                warn!(id = result.id, "Evaluation failed: {}", first_line);
            }
        }
        self.received += 1;

        info!(
            id = result.id,
            failed = result.is_failure(),
            "Collected result {}/{}",
            self.received,
            self.total
        );
        if let Some(pb) = &self.progress {
            pb.inc(1);
            pb.set_message(format!("{} scored | {} failed", self.scored, self.failed));
        }
        Ok(())
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn scored(&self) -> usize {
        self.scored
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Stop the progress bar, leaving a final line.
    pub fn finish(&self) {
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!(
                "done | {} scored | {} failed",
                self.scored, self.failed
            ));
        }
    }
}
