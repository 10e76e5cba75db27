//! Evaluator invocation inside a model directory.
//!
//! Each model directory ships its own evaluator program. The program is run
//! with the model directory as working directory, receives one JSON request
//! on stdin and prints the score mapping as JSON on its last output line.
//!
//! Scores must be finite numbers. The bare `NaN` and `Infinity` tokens that
//! Python's `json.dumps` emits are not JSON; a score line containing them
//! fails the combination with a message naming the offending token, so the
//! evaluator has to replace them (e.g. with a large penalty value) itself.

use super::task::{Outcome, Parameters, Scores, TaskDescriptor};
use crate::config::EvaluatorSpec;
use anyhow::{Context, anyhow, bail};
use serde::Serialize;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Bytes of evaluator stderr kept in failure messages.
const STDERR_TAIL_BYTES: usize = 4096;

/// A score evaluator bound to one emodel.
pub trait Evaluator {
    /// Morphology the next evaluation runs on.
    fn set_morphology_path(&mut self, path: PathBuf);

    /// Evaluate a parameter set, returning scores.
    fn evaluate(&mut self, params: &Parameters) -> anyhow::Result<Scores>;
}

#[derive(Serialize)]
struct EvaluationRequest<'a> {
    emodel: &'a str,
    morphology_path: &'a Path,
    params: &'a Parameters,
}

/// Evaluator backed by the model directory's evaluator program.
#[derive(Debug)]
pub struct CommandEvaluator {
    emodel: String,
    program: String,
    args: Vec<String>,
    morphology_path: Option<PathBuf>,
}

impl CommandEvaluator {
    /// Bind an evaluator to `emodel`. Relative program paths are resolved
    /// against the current working directory.
    pub fn create(emodel: &str, spec: &EvaluatorSpec) -> anyhow::Result<Self> {
        if spec.program.contains('/') && !Path::new(&spec.program).exists() {
            let cwd = std::env::current_dir().unwrap_or_default();
            bail!(
                "evaluator program '{}' not found (working directory {})",
                spec.program,
                cwd.display()
            );
        }
        Ok(Self {
            emodel: emodel.to_string(),
            program: spec.program.clone(),
            args: spec.args.clone(),
            morphology_path: None,
        })
    }

    pub fn emodel(&self) -> &str {
        &self.emodel
    }
}

impl Evaluator for CommandEvaluator {
    fn set_morphology_path(&mut self, path: PathBuf) {
        self.morphology_path = Some(path);
    }

    fn evaluate(&mut self, params: &Parameters) -> anyhow::Result<Scores> {
        let morphology_path = self
            .morphology_path
            .as_deref()
            .ok_or_else(|| anyhow!("no morphology path set for emodel {}", self.emodel))?;

        let request = serde_json::to_vec(&EvaluationRequest {
            emodel: &self.emodel,
            morphology_path,
            params,
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("MMSCORE_EMODEL", &self.emodel)
            .env("MMSCORE_MORPHOLOGY_PATH", morphology_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start evaluator '{}'", self.program))?;

        // Feed stdin from a thread so a chatty evaluator cannot deadlock on a full stdout pipe.
        let stdin = child.stdin.take();
        let feeder = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&request) {
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => other,
                }
            } else {
                Ok(())
            }
        });

        let output = child
            .wait_with_output()
            .context("failed to wait for evaluator")?;
        feeder
            .join()
            .map_err(|_| anyhow!("evaluator stdin feeder panicked"))?
            .context("failed to send request to evaluator")?;

        if !output.status.success() {
            bail!(
                "evaluator '{}' {}\n--- evaluator stderr ---\n{}",
                self.program,
                output.status,
                stderr_tail(&output.stderr)
            );
        }

        parse_scores(&output.stdout).with_context(|| {
            format!(
                "evaluator '{}' produced no score mapping\n--- evaluator stderr ---\n{}",
                self.program,
                stderr_tail(&output.stderr)
            )
        })
    }
}

/// Parse the last non-empty stdout line as a score mapping.
fn parse_scores(stdout: &[u8]) -> anyhow::Result<Scores> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("evaluator output is empty"))?;
    if let Some(token) = non_finite_token(line) {
        bail!(
            "score line contains non-finite value {} (scores must be finite JSON numbers): {}",
            token,
            line
        );
    }
    serde_json::from_str(line).with_context(|| format!("invalid score line: {}", line))
}

/// First bare `NaN`/`Infinity` token outside a string, if any.
fn non_finite_token(line: &str) -> Option<&'static str> {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
            continue;
        }
        let rest = &line[i..];
        if rest.starts_with("NaN") {
            return Some("NaN");
        }
        if rest.starts_with("Infinity") {
            return Some("Infinity");
        }
    }
    None
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim_end().to_string()
}

/// Working directory scope. Restores the previous directory when dropped.
pub struct CwdGuard {
    previous: PathBuf,
}

impl CwdGuard {
    pub fn enter(dir: &Path) -> anyhow::Result<Self> {
        let previous = std::env::current_dir().context("cannot read working directory")?;
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot change directory to {}", dir.display()))?;
        debug!(dir = %dir.display(), "Changed working directory");
        Ok(Self { previous })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.previous);
    }
}

/// Run one combination: enter the model directory, construct the evaluator,
/// bind the morphology and score the parameters.
///
/// Mutates the process working directory, so it must only run in a process
/// dedicated to this evaluation.
pub fn run_emodel_morph<E, F>(task: &TaskDescriptor, construct: F) -> anyhow::Result<Scores>
where
    E: Evaluator,
    F: FnOnce(&str) -> anyhow::Result<E>,
{
    info!(
        id = task.id,
        emodel = %task.emodel,
        morphology = %task.morphology_path.display(),
        dir = %task.emodel_dir.display(),
        "Running emodel on morphology"
    );

    let _cwd = CwdGuard::enter(&task.emodel_dir)?;

    let mut evaluator = construct(&task.emodel)
        .with_context(|| format!("cannot construct evaluator for emodel {}", task.emodel))?;
    evaluator.set_morphology_path(task.morphology_path.clone());

    evaluator
        .evaluate(&task.params)
        .with_context(|| format!("evaluation of combination {} failed", task.id))
}

/// Evaluate a task with the model directory's evaluator program.
///
/// Never fails: errors and panics become a `Failed` outcome whose message
/// carries the full cause chain.
pub fn evaluate_task(task: &TaskDescriptor, spec: &EvaluatorSpec) -> Outcome {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        run_emodel_morph(task, |emodel| CommandEvaluator::create(emodel, spec))
    }));

    match result {
        Ok(Ok(scores)) => Outcome::Scored { scores },
        Ok(Err(e)) => Outcome::Failed {
            message: format!("{:?}", e),
        },
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Outcome::Failed {
                message: format!("evaluation of combination {} panicked: {}", task.id, detail),
            }
        }
    }
}
