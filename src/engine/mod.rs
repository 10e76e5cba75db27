//! Isolated parallel evaluation engine.
//!
//! A run reads the pending combinations from the scores database, turns
//! them into self-contained tasks, evaluates them on the two-level worker
//! pool and writes every result back as soon as it arrives.

pub mod collector;
pub mod enumerate;
pub mod evaluator;
pub mod registry;
pub mod task;

use crate::config::RunConfig;
use crate::db::ScoresDb;
use crate::db::queries::StoreSummary;
use crate::error::Result;
use crate::worker::{WorkerPool, WorkerPoolConfig};
use collector::ResultCollector;
use registry::{ModelRegistry, load_final_dict};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, instrument};

/// Options for one engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub run: RunConfig,
    /// Outer pool size.
    pub workers: usize,
    /// Turn failed rows back into pending rows before enumerating.
    pub retry_failed: bool,
    pub show_progress: bool,
    /// Executable re-run as worker; defaults to the current executable.
    pub worker_exe: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new(run: RunConfig) -> Self {
        let workers = run
            .workers
            .unwrap_or_else(crate::config::default_worker_count);
        Self {
            run,
            workers,
            retry_failed: false,
            show_progress: false,
            worker_exe: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_retry_failed(mut self, retry: bool) -> Self {
        self.retry_failed = retry;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_worker_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker_exe = Some(exe.into());
        self
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Tasks built from pending rows.
    pub enumerated: usize,
    /// Results written as scores during this run.
    pub scored: usize,
    /// Results written as failures during this run.
    pub failed: usize,
    /// Stopped by a shutdown request before all tasks were dispatched.
    pub interrupted: bool,
    /// Stopped early without a shutdown request: no outer worker could be
    /// restarted, so some tasks were never evaluated.
    pub incomplete: bool,
    /// State of the store after the run.
    pub store: StoreSummary,
}

/// Evaluate every pending combination of the configured store.
///
/// Lookup failures abort before any evaluation. Per-task failures are
/// recorded and do not stop the run. A failed write-back aborts the run at
/// once, killing the evaluations still in flight and leaving their rows
/// pending.
#[instrument(skip_all, fields(db = %config.run.scores_db.display()))]
pub fn run(config: &EngineConfig, shutdown: &AtomicBool) -> Result<RunReport> {
    let start = Instant::now();
    let db = ScoresDb::open(&config.run.scores_db)?;

    if config.retry_failed {
        let reset = db.reset_failures()?;
        info!(rows = reset, "Reset failed combinations to pending");
    }

    let final_dict = load_final_dict(&config.run.final_json)?;
    let registry = ModelRegistry::build(&config.run.emodels_dir, final_dict)?;
    let rows = db.load_rows()?;
    let tasks = enumerate::create_tasks(&rows, &registry)?;

    let mut report = RunReport {
        enumerated: tasks.len(),
        ..Default::default()
    };
    info!(
        rows = rows.len(),
        tasks = tasks.len(),
        models = registry.len(),
        "Enumerated pending combinations"
    );

    if !tasks.is_empty() {
        let pool_config = WorkerPoolConfig {
            worker_count: config.workers.min(tasks.len()),
            worker_exe: config.worker_exe.clone(),
            ..Default::default()
        };
        let mut pool = WorkerPool::new(pool_config)?;

        let mut collector = ResultCollector::new(&db, tasks.len());
        if config.show_progress {
            collector = collector.with_progress();
        }

        let outcome = pool.run_unordered(tasks, &config.run.evaluator, shutdown, |result| {
            collector.collect(result)
        });
        collector.finish();
        report.scored = collector.scored();
        report.failed = collector.failed();

        let stats = outcome?;
        let stop_requested = shutdown.load(Ordering::SeqCst);
        report.interrupted = stats.stopped_early && stop_requested;
        report.incomplete = stats.stopped_early && !stop_requested;
        if report.incomplete {
            error!(
                submitted = stats.submitted,
                delivered = stats.delivered,
                "Outer workers could not be restarted, run stopped early"
            );
        }

        let pool_stats = pool.stats();
        info!(
            workers = pool_stats.worker_count,
            restarts = pool_stats.total_restarts,
            "Worker pool finished"
        );
    }

    report.store = db.summary()?;
    info!(
        scored = report.scored,
        failed = report.failed,
        pending = report.store.pending,
        elapsed_ms = start.elapsed().as_millis(),
        "Run finished"
    );
    Ok(report)
}

/// Read the store summary without evaluating anything.
pub fn status(config: &RunConfig) -> Result<StoreSummary> {
    ScoresDb::open(&config.scores_db)?.summary()
}

/// Turn failed rows back into pending rows. Returns how many were reset.
pub fn reset_failed(config: &RunConfig) -> Result<usize> {
    ScoresDb::open(&config.scores_db)?.reset_failures()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorSpec;
    use crate::db::test_support::create_scores_db;
    use crate::error::MmError;
    use tempfile::tempdir;

    fn run_config(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            scores_db: dir.join("scores.sqlite"),
            emodels_dir: dir.join("emodels"),
            final_json: dir.join("emodels/final.json"),
            evaluator: EvaluatorSpec::default(),
            workers: Some(3),
        }
    }

    #[test]
    fn test_engine_config_defaults_from_run_config() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(run_config(dir.path()));
        assert_eq!(config.workers, 3);
        assert!(!config.retry_failed);

        let config = config.with_workers(8).with_retry_failed(true);
        assert_eq!(config.workers, 8);
        assert!(config.retry_failed);
    }

    #[test]
    fn test_unknown_emodel_aborts_before_evaluation() {
        let dir = tempdir().unwrap();
        let config = run_config(dir.path());
        std::fs::create_dir_all(dir.path().join("emodels/cADpyr_L5PC")).unwrap();
        std::fs::write(&config.final_json, r#"{"cADpyr_L5PC": {"params": {}}}"#).unwrap();
        create_scores_db(
            &config.scores_db,
            &[(1, "cADpyr_L5PC", "/m", "a.asc"), (2, "bNAC_L23", "/m", "b.asc")],
        );

        // A worker executable that cannot exist proves no pool is ever started
        let engine = EngineConfig::new(config.clone()).with_worker_exe("/nonexistent/mmscore");
        let err = run(&engine, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, MmError::ModelNotFound { emodel, .. } if emodel == "bNAC_L23"));
        assert_eq!(status(&config).unwrap().pending, 2);
    }

    #[test]
    fn test_nothing_pending_starts_no_workers() {
        let dir = tempdir().unwrap();
        let config = run_config(dir.path());
        std::fs::create_dir_all(&config.emodels_dir).unwrap();
        std::fs::write(&config.final_json, "{}").unwrap();
        create_scores_db(&config.scores_db, &[]);

        let engine = EngineConfig::new(config).with_worker_exe("/nonexistent/mmscore");
        let report = run(&engine, &AtomicBool::new(false)).unwrap();
        assert_eq!(report.enumerated, 0);
        assert_eq!(report.store.total, 0);
        assert!(!report.interrupted);
    }
}
