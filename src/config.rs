//! Run configuration file.
//!
//! ```json
//! {
//!     "scores_db": "output/scores.sqlite",
//!     "emodels_dir": "tmp/emodels",
//!     "final_json": "tmp/emodels/final.json",
//!     "evaluator": { "program": "./run_evaluator", "args": [] },
//!     "workers": 8
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use crate::error::{MmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default evaluator entry point inside each model directory.
pub const DEFAULT_EVALUATOR_PROGRAM: &str = "./run_evaluator";

/// Name of the parameters file inside the emodels directory.
pub const FINAL_JSON: &str = "final.json";

/// How to start the evaluator of a model directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorSpec {
    /// Program to run, relative to the model directory unless absolute.
    pub program: String,
    /// Extra arguments passed before the evaluator reads its request.
    pub args: Vec<String>,
}

impl Default for EvaluatorSpec {
    fn default() -> Self {
        Self {
            program: DEFAULT_EVALUATOR_PROGRAM.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRunConfig {
    scores_db: PathBuf,
    emodels_dir: PathBuf,
    final_json: Option<PathBuf>,
    #[serde(default)]
    evaluator: EvaluatorSpec,
    workers: Option<usize>,
}

/// Resolved run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Pending-work store.
    pub scores_db: PathBuf,
    /// Root of the prepared model directories.
    pub emodels_dir: PathBuf,
    /// Emodel parameters file.
    pub final_json: PathBuf,
    pub evaluator: EvaluatorSpec,
    /// Outer pool size; `None` means one worker per processor.
    pub workers: Option<usize>,
}

impl RunConfig {
    /// Load and resolve a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MmError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::from_json(&contents, base)
    }

    /// Parse configuration JSON, resolving relative paths against `base`.
    pub fn from_json(contents: &str, base: &Path) -> Result<Self> {
        let raw: RawRunConfig = serde_json::from_str(contents)
            .map_err(|e| MmError::Config(format!("malformed configuration: {}", e)))?;

        if raw.workers == Some(0) {
            return Err(MmError::Config("workers must be at least 1".to_string()));
        }
        if raw.evaluator.program.trim().is_empty() {
            return Err(MmError::Config(
                "evaluator.program must not be empty".to_string(),
            ));
        }

        let emodels_dir = base.join(raw.emodels_dir);
        let final_json = raw
            .final_json
            .map(|p| base.join(p))
            .unwrap_or_else(|| emodels_dir.join(FINAL_JSON));

        Ok(Self {
            scores_db: base.join(raw.scores_db),
            emodels_dir,
            final_json,
            evaluator: raw.evaluator,
            workers: raw.workers,
        })
    }
}

/// Number of outer workers used when none is configured.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
