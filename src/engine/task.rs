//! Task descriptors and evaluation results exchanged with workers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Identifier of a combination row in the scores table.
pub type ComboId = i64;

/// Score name to value, as returned by an evaluator.
pub type Scores = BTreeMap<String, f64>;

/// Model parameter name to value.
pub type Parameters = BTreeMap<String, serde_json::Value>;

/// Self-contained unit of evaluation work.
///
/// Everything a worker needs is resolved up front; no further lookups happen
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: ComboId,
    /// Emodel name as stored, including any variant suffix.
    pub emodel: String,
    /// Absolute path of the prepared model directory.
    pub emodel_dir: PathBuf,
    pub params: Parameters,
    /// Absolute path of the morphology file.
    pub morphology_path: PathBuf,
}

/// Outcome of evaluating one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Scored { scores: Scores },
    Failed { message: String },
}

/// Result of one task, tagged with its combination id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: ComboId,
    pub outcome: Outcome,
}

impl EvaluationResult {
    pub fn scored(id: ComboId, scores: Scores) -> Self {
        Self {
            id,
            outcome: Outcome::Scored { scores },
        }
    }

    pub fn failed(id: ComboId, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failed {
                message: message.into(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_format_is_tagged() {
        let result = EvaluationResult::failed(7, "evaluator exited with status 1");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(
            json["outcome"]["message"],
            "evaluator exited with status 1"
        );
    }

    #[test]
    fn test_scored_result() {
        let mut scores = Scores::new();
        scores.insert("Step1.AP_amplitude".to_string(), 0.25);
        let result = EvaluationResult::scored(3, scores.clone());
        assert!(!result.is_failure());
        assert_eq!(result.outcome, Outcome::Scored { scores });
    }
}
