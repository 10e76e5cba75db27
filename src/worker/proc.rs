//! Process handle for worker subprocesses.
//!
//! Wraps a child process with its request and response pipes. Reaping goes
//! through `waitpid` directly so crash signals can be classified.

use super::ipc::{LineReader, LineWriter};
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{MmError, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::process::{Child, ChildStdin, ChildStdout};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a worker subprocess with IPC channels.
pub struct WorkerProc {
    pid: Pid,
    writer: LineWriter<ChildStdin>,
    reader: LineReader<ChildStdout>,
    /// Wait status once the process has been reaped.
    status: Option<WaitStatus>,
}

impl WorkerProc {
    /// Take ownership of a spawned child's stdin and stdout.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let pid = Pid::from_raw(child.id() as i32);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MmError::Worker("child stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MmError::Worker("child stdout not captured".into()))?;

        Ok(Self {
            pid,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(stdout),
            status: None,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Send a request to the worker.
    pub fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let line = request.to_line()?;
        self.writer
            .write_line(&line)
            .map_err(|e| MmError::Worker(format!("failed to send to worker {}: {}", self.pid, e)))
    }

    /// Receive a response from the worker.
    ///
    /// Returns `None` if the worker closed its stdout (EOF).
    pub fn recv(&mut self) -> Result<Option<WorkResponse>> {
        match self.reader.read_line() {
            Ok(Some(line)) => {
                let response = WorkResponse::from_line(line).map_err(|e| {
                    MmError::Worker(format!("invalid response from worker {}: {}", self.pid, e))
                })?;
                Ok(Some(response))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(MmError::Worker(format!(
                "failed to receive from worker {}: {}",
                self.pid, e
            ))),
        }
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Reap the process without blocking. Returns `None` while it runs.
    pub fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.status = Some(status);
                Ok(Some(status))
            }
            Err(e) => Err(MmError::Worker(format!("waitpid({}) failed: {}", self.pid, e))),
        }
    }

    /// Block until the process exits.
    pub fn wait(&mut self) -> Result<WaitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = waitpid(self.pid, None)
            .map_err(|e| MmError::Worker(format!("waitpid({}) failed: {}", self.pid, e)))?;
        self.status = Some(status);
        Ok(status)
    }

    /// Poll for exit until `timeout` elapses.
    fn wait_timeout(&mut self, timeout: Duration) -> Option<WaitStatus> {
        let start = Instant::now();
        loop {
            match self.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if start.elapsed() < timeout => std::thread::sleep(POLL_INTERVAL),
                _ => return None,
            }
        }
    }

    /// Classify how a worker that closed its pipe went away.
    ///
    /// Waits up to `timeout` for it to exit on its own, then kills it.
    pub fn reap(&mut self, timeout: Duration) -> TerminationReason {
        if let Some(status) = self.wait_timeout(timeout) {
            return analyze_wait_status(status);
        }
        let _ = self.kill();
        self.status
            .map(analyze_wait_status)
            .unwrap_or(TerminationReason::Unknown)
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| MmError::Worker(format!("failed to send SIGTERM to {}: {}", self.pid, e)))
    }

    /// Send SIGKILL to the process and reap it.
    pub fn kill(&mut self) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGKILL)
            .map_err(|e| MmError::Worker(format!("failed to send SIGKILL to {}: {}", self.pid, e)))?;
        self.wait()?;
        Ok(())
    }

    /// Ask the worker to exit, escalating to SIGTERM and SIGKILL.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }

        // The worker may already be gone; a broken pipe here is expected.
        let _ = self.send(&WorkRequest::Exit);
        if self.wait_timeout(timeout).is_some() {
            return Ok(());
        }

        let _ = self.terminate();
        if self.wait_timeout(Duration::from_millis(100)).is_some() {
            return Ok(());
        }

        self.kill()
    }
}

impl Drop for WorkerProc {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.terminate();
            if self.wait_timeout(POLL_INTERVAL).is_some() {
                return;
            }
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(program: &str, args: &[&str]) -> WorkerProc {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn test process");
        WorkerProc::from_child(child).expect("Failed to wrap child")
    }

    #[test]
    fn test_echoed_request_is_not_a_response() {
        // cat echoes the request back, which does not parse as a response
        let mut proc = spawn("cat", &[]);
        proc.send(&WorkRequest::Exit).unwrap();
        assert!(matches!(proc.recv(), Err(MmError::Worker(_))));

        proc.stop(Duration::from_secs(1)).unwrap();
        assert!(!proc.is_running());
    }

    #[test]
    fn test_recv_response_then_eof() {
        let mut proc = spawn("sh", &["-c", r#"echo '{"type":"ready"}'"#]);
        assert!(matches!(proc.recv().unwrap(), Some(WorkResponse::Ready)));
        assert!(proc.recv().unwrap().is_none());
        assert_eq!(proc.reap(Duration::from_secs(5)), TerminationReason::Exited(0));
    }

    #[test]
    fn test_reap_classifies_crash() {
        let mut proc = spawn("sh", &["-c", "kill -SEGV $$"]);
        assert!(proc.recv().unwrap().is_none());
        assert_eq!(
            proc.reap(Duration::from_secs(5)),
            TerminationReason::Crashed(Signal::SIGSEGV)
        );
    }

    #[test]
    fn test_terminate() {
        let mut proc = spawn("sleep", &["60"]);
        assert!(proc.is_running());

        proc.terminate().unwrap();
        let status = proc.wait().unwrap();
        assert_eq!(
            analyze_wait_status(status),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
        assert!(!proc.is_running());
    }

    #[test]
    fn test_stop_escalates_when_exit_is_ignored() {
        let mut proc = spawn("sleep", &["60"]);
        proc.stop(Duration::from_millis(50)).unwrap();
        assert!(!proc.is_running());
    }
}
