//! IPC protocol between the parent, outer workers and inner workers.
//!
//! Messages are JSON-serialized and newline-delimited. The same request and
//! response types travel on both levels: the parent sends `Evaluate` to an
//! outer worker, which forwards it unchanged to a fresh inner worker.

use crate::config::EvaluatorSpec;
use crate::engine::task::{EvaluationResult, TaskDescriptor};
use serde::{Deserialize, Serialize};

/// Request sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkRequest {
    /// Evaluate one combination.
    Evaluate {
        task: TaskDescriptor,
        evaluator: EvaluatorSpec,
    },

    /// Graceful shutdown request.
    Exit,
}

/// Response from a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkResponse {
    /// Evaluation finished, successfully or not.
    Result { result: EvaluationResult },

    /// The worker could not understand the request.
    Error { message: String },

    /// Worker is ready for work.
    Ready,
}

impl WorkRequest {
    pub fn evaluate(task: &TaskDescriptor, evaluator: &EvaluatorSpec) -> Self {
        Self::Evaluate {
            task: task.clone(),
            evaluator: evaluator.clone(),
        }
    }

    /// Serialize to a JSON line (with newline).
    ///
    /// Fails only for paths that are not valid UTF-8.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    pub fn result(result: EvaluationResult) -> Self {
        Self::Result { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::{Outcome, Parameters};
    use std::path::PathBuf;

    fn task() -> TaskDescriptor {
        let mut params = Parameters::new();
        params.insert("g_pas".to_string(), serde_json::json!(3e-5));
        TaskDescriptor {
            id: 17,
            emodel: "cADpyr_L5PC_legacy".to_string(),
            emodel_dir: PathBuf::from("/emodels/cADpyr_L5PC"),
            params,
            morphology_path: PathBuf::from("/morphs/C060114A5.asc"),
        }
    }

    #[test]
    fn test_evaluate_request_wire_format() {
        let line = WorkRequest::evaluate(&task(), &EvaluatorSpec::default())
            .to_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.starts_with(r#"{"type":"evaluate""#));

        match WorkRequest::from_line(&line).unwrap() {
            WorkRequest::Evaluate { task, evaluator } => {
                assert_eq!(task.id, 17);
                assert_eq!(task.emodel_dir, PathBuf::from("/emodels/cADpyr_L5PC"));
                assert_eq!(evaluator, EvaluatorSpec::default());
            }
            other => panic!("Expected Evaluate, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_and_ready() {
        assert_eq!(WorkRequest::Exit.to_line().unwrap(), "{\"type\":\"exit\"}\n");
        assert!(matches!(
            WorkResponse::from_line(r#"{"type":"ready"}"#).unwrap(),
            WorkResponse::Ready
        ));
    }

    #[test]
    fn test_failed_result_response() {
        let line = WorkResponse::result(EvaluationResult::failed(4, "segfault"))
            .to_line()
            .unwrap();

        match WorkResponse::from_line(&line).unwrap() {
            WorkResponse::Result { result } => {
                assert_eq!(result.id, 4);
                assert!(matches!(result.outcome, Outcome::Failed { ref message } if message == "segfault"));
            }
            other => panic!("Expected Result, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(WorkRequest::from_line(r#"{"type":"extract"}"#).is_err());
        assert!(WorkResponse::from_line("not json").is_err());
    }
}
