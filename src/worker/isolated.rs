//! Single-use isolated execution of one task.
//!
//! The outer worker never evaluates in its own process. Each task gets a
//! fresh inner worker, which is stopped and reaped before the next task, so
//! no evaluator state survives from one combination to the next and a native
//! crash only costs the combination that caused it.

use super::proc::WorkerProc;
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::WorkerFailure;
use super::spawn::{WorkerConfig, spawn_worker};
use crate::config::EvaluatorSpec;
use crate::engine::task::{EvaluationResult, TaskDescriptor};
use crate::error::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// How long an inner worker gets to exit after answering.
const INNER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `task` in a fresh inner worker and wait for it to finish.
///
/// Never fails: spawn errors, protocol errors and crashes of the inner
/// worker all become a failed result for this task.
pub fn run_isolated(
    task: &TaskDescriptor,
    evaluator: &EvaluatorSpec,
    exe: Option<PathBuf>,
) -> EvaluationResult {
    let mut proc = match spawn_worker(&WorkerConfig::inner(exe)) {
        Ok(proc) => proc,
        Err(e) => {
            return EvaluationResult::failed(
                task.id,
                format!("cannot start isolated worker for combination {}: {}", task.id, e),
            );
        }
    };
    debug!(id = task.id, pid = %proc.pid(), "Isolated worker started");

    let result = match exchange(&mut proc, task, evaluator) {
        Ok(Some(result)) => result,
        Ok(None) => {
            let reason = proc.reap(INNER_EXIT_TIMEOUT);
            let failure = WorkerFailure::new("isolated worker", reason)
                .with_context(format!("evaluating combination {}", task.id));
            warn!(id = task.id, emodel = %task.emodel, "{}", failure);
            EvaluationResult::failed(task.id, failure.to_string())
        }
        Err(e) => EvaluationResult::failed(
            task.id,
            format!("isolated worker for combination {} failed: {}", task.id, e),
        ),
    };

    if let Err(e) = proc.stop(INNER_EXIT_TIMEOUT) {
        warn!(id = task.id, error = %e, "Failed to stop isolated worker");
    }
    result
}

/// Send the task and read its result. `None` means the worker went away
/// without answering.
fn exchange(
    proc: &mut WorkerProc,
    task: &TaskDescriptor,
    evaluator: &EvaluatorSpec,
) -> Result<Option<EvaluationResult>> {
    // A worker that dies on startup breaks the pipe; report it as a death.
    if proc.send(&WorkRequest::evaluate(task, evaluator)).is_err() {
        return Ok(None);
    }

    match proc.recv()? {
        Some(WorkResponse::Result { result }) if result.id == task.id => Ok(Some(result)),
        Some(WorkResponse::Result { result }) => Ok(Some(EvaluationResult::failed(
            task.id,
            format!(
                "isolated worker answered for combination {} instead of {}",
                result.id, task.id
            ),
        ))),
        Some(WorkResponse::Error { message }) => Ok(Some(EvaluationResult::failed(
            task.id,
            format!("isolated worker rejected request: {}", message),
        ))),
        Some(WorkResponse::Ready) => Ok(Some(EvaluationResult::failed(
            task.id,
            "isolated worker sent Ready instead of a result",
        ))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::Parameters;

    fn task() -> TaskDescriptor {
        TaskDescriptor {
            id: 9,
            emodel: "bAC_L6".to_string(),
            emodel_dir: PathBuf::from("/emodels/bAC_L6"),
            params: Parameters::new(),
            morphology_path: PathBuf::from("/morphs/m.asc"),
        }
    }

    #[test]
    fn test_spawn_failure_becomes_failed_result() {
        let result = run_isolated(
            &task(),
            &EvaluatorSpec::default(),
            Some(PathBuf::from("/nonexistent/mmscore")),
        );
        assert_eq!(result.id, 9);
        assert!(result.is_failure());
    }

    #[test]
    fn test_crashing_worker_becomes_failed_result() {
        // /bin/sh treats "worker" as a script path and exits 127 without answering
        let result = run_isolated(
            &task(),
            &EvaluatorSpec::default(),
            Some(PathBuf::from("/bin/sh")),
        );
        assert_eq!(result.id, 9);
        match result.outcome {
            crate::engine::task::Outcome::Failed { message } => {
                assert!(message.contains("isolated worker"));
                assert!(message.contains("combination 9"));
            }
            other => panic!("Expected failure, got {:?}", other),
        }
    }
}
