//! Worker subprocess spawning.
//!
//! Workers are this same executable re-run in `worker --role <role>` mode.
//! A worker spawned without the children capability carries a daemon marker
//! in its environment and refuses to spawn workers of its own.

use super::proc::WorkerProc;
use crate::error::{MmError, Result};
use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// Environment marker set on workers that may not have children.
pub const DAEMON_ENV: &str = "MMSCORE_DAEMON_WORKER";

/// Which level of the pool a worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerRole {
    /// Long-lived pool member that runs each task in a fresh inner worker.
    Outer,
    /// Single-use worker that evaluates exactly one task.
    Inner,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outer => "outer",
            Self::Inner => "inner",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub role: WorkerRole,
    /// Whether the worker may itself spawn workers.
    pub allow_children: bool,
    /// Executable to run; defaults to the current executable.
    pub exe: Option<PathBuf>,
}

impl WorkerConfig {
    /// Long-lived outer worker. It hosts inner workers, so it keeps the
    /// children capability.
    pub fn outer(exe: Option<PathBuf>) -> Self {
        Self {
            role: WorkerRole::Outer,
            allow_children: true,
            exe,
        }
    }

    /// Single-use inner worker. The evaluator it runs may start its own
    /// helper processes, so it keeps the children capability too.
    pub fn inner(exe: Option<PathBuf>) -> Self {
        Self {
            role: WorkerRole::Inner,
            allow_children: true,
            exe,
        }
    }
}

/// Whether a process with the given daemon marker may spawn workers.
pub fn children_permitted(marker: Option<&OsStr>) -> bool {
    marker.is_none_or(|value| value.is_empty() || value == "0")
}

/// Spawn a worker subprocess.
///
/// Fails when the calling process is itself a daemonic worker.
pub fn spawn_worker(config: &WorkerConfig) -> Result<WorkerProc> {
    if !children_permitted(std::env::var_os(DAEMON_ENV).as_deref()) {
        return Err(MmError::Worker(
            "daemonic worker processes are not allowed to have children".into(),
        ));
    }

    let exe_path = match &config.exe {
        Some(exe) => exe.clone(),
        None => std::env::current_exe()
            .map_err(|e| MmError::Worker(format!("failed to get current executable: {}", e)))?,
    };

    let mut cmd = Command::new(&exe_path);
    cmd.arg("worker").arg("--role").arg(config.role.as_str());

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit()); // Worker logs go to parent's stderr

    if config.allow_children {
        cmd.env_remove(DAEMON_ENV);
    } else {
        cmd.env(DAEMON_ENV, "1");
    }

    // Outer workers get their own process group so an interactive Ctrl+C
    // reaches only the parent, which then drains in-flight work.
    if config.role == WorkerRole::Outer {
        cmd.process_group(0);
    }

    let child = cmd.spawn().map_err(|e| {
        MmError::Worker(format!(
            "failed to spawn {} worker {}: {}",
            config.role,
            exe_path.display(),
            e
        ))
    })?;

    debug!(role = %config.role, pid = child.id(), "Spawned worker");
    WorkerProc::from_child(child)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_permitted() {
        assert!(children_permitted(None));
        assert!(children_permitted(Some(OsStr::new(""))));
        assert!(children_permitted(Some(OsStr::new("0"))));
        assert!(!children_permitted(Some(OsStr::new("1"))));
    }

    #[test]
    fn test_both_levels_may_have_children() {
        assert!(WorkerConfig::outer(None).allow_children);
        assert!(WorkerConfig::inner(None).allow_children);
        assert_eq!(WorkerConfig::inner(None).role, WorkerRole::Inner);
    }

    #[test]
    fn test_spawn_missing_executable() {
        let config = WorkerConfig::inner(Some(PathBuf::from("/nonexistent/mmscore")));
        let err = spawn_worker(&config).err().unwrap();
        assert!(err.to_string().contains("failed to spawn inner worker"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(WorkerRole::Outer.to_string(), "outer");
        assert_eq!(WorkerRole::Inner.as_str(), "inner");
    }
}
