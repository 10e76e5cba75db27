//! Crash analysis for worker subprocesses.
//!
//! Turns a raw wait status into a reason that can be recorded as the failure
//! message of the combination the worker was evaluating.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Hard crash inside native code (SIGSEGV, SIGBUS, SIGABRT, SIGILL, SIGFPE).
    Crashed(Signal),
    /// SIGKILL, most often from the OOM killer.
    Killed,
    /// Any other signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    Unknown,
}

impl TerminationReason {
    /// Native crash that took the whole process down.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crashed(_) | Self::Killed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Crashed(sig) => format!("crashed with signal {:?}", sig),
            Self::Killed => "was killed (SIGKILL, possibly out of memory)".to_string(),
            Self::Signaled(sig) => format!("was terminated by signal {:?}", sig),
            Self::StillAlive => "is still running".to_string(),
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Classify a `WaitStatus`.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),

        WaitStatus::Signaled(_, signal, _) => match signal {
            Signal::SIGKILL => TerminationReason::Killed,
            Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGABRT | Signal::SIGILL | Signal::SIGFPE => {
                TerminationReason::Crashed(signal)
            }
            _ => TerminationReason::Signaled(signal),
        },

        WaitStatus::StillAlive => TerminationReason::StillAlive,

        _ => TerminationReason::Unknown,
    }
}

/// A worker that died while it owned a combination.
#[derive(Debug)]
pub struct WorkerFailure {
    pub reason: TerminationReason,
    /// Which worker died, e.g. "isolated worker".
    pub worker: String,
    /// What the worker was doing when it died.
    pub context: Option<String>,
}

impl WorkerFailure {
    pub fn new(worker: impl Into<String>, reason: TerminationReason) -> Self {
        Self {
            reason,
            worker: worker.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.worker, self.reason)?;
        if let Some(ctx) = &self.context {
            write!(f, " while {}", ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_analyze_wait_status() {
        let pid = Pid::from_raw(1);

        assert_eq!(
            analyze_wait_status(WaitStatus::Exited(pid, 0)),
            TerminationReason::Exited(0)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGSEGV, true)),
            TerminationReason::Crashed(Signal::SIGSEGV)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            TerminationReason::Killed
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }

    #[test]
    fn test_crash_classification() {
        assert!(TerminationReason::Crashed(Signal::SIGABRT).is_crash());
        assert!(TerminationReason::Killed.is_crash());
        assert!(!TerminationReason::Exited(1).is_crash());
        assert!(!TerminationReason::Signaled(Signal::SIGTERM).is_crash());

        assert!(TerminationReason::Exited(0).is_success());
        assert!(!TerminationReason::Exited(1).is_success());
    }

    #[test]
    fn test_worker_failure_display() {
        let failure = WorkerFailure::new(
            "isolated worker",
            TerminationReason::Crashed(Signal::SIGSEGV),
        )
        .with_context("evaluating combination 12");

        let display = failure.to_string();
        assert_eq!(
            display,
            "isolated worker crashed with signal SIGSEGV while evaluating combination 12"
        );
    }
}
