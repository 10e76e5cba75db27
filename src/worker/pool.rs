//! Outer worker pool.
//!
//! A fixed set of long-lived outer workers. Each pool slot is driven by its
//! own scheduler thread that pulls tasks from a shared queue, so a slot
//! takes the next task as soon as it is free. Results flow back to the
//! calling thread in completion order.

use super::proc::WorkerProc;
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::{TerminationReason, WorkerFailure};
use super::spawn::{WorkerConfig, spawn_worker};
use crate::config::EvaluatorSpec;
use crate::engine::task::{EvaluationResult, TaskDescriptor};
use crate::error::{MmError, Result};
use crossbeam_channel::{bounded, unbounded};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of outer worker processes.
    pub worker_count: usize,
    /// Executable re-run in worker mode; defaults to the current executable.
    pub worker_exe: Option<PathBuf>,
    /// Grace period for a worker to exit when stopped.
    pub stop_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::config::default_worker_count(),
            worker_exe: None,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Poll interval while waiting for killed slots to unwind.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A single outer worker in the pool.
struct OuterWorker {
    /// Process handle (None if the worker needs respawn).
    proc: Option<WorkerProc>,
    /// Pid of the live process, 0 when there is none. Readable from other
    /// threads so a stuck slot can be killed from outside.
    live_pid: Arc<AtomicI32>,
    config: WorkerConfig,
    id: usize,
    tasks_completed: usize,
    restarts: usize,
    stop_timeout: Duration,
}

impl OuterWorker {
    fn new(id: usize, config: WorkerConfig, stop_timeout: Duration) -> Result<Self> {
        let proc = spawn_worker(&config)?;
        let live_pid = Arc::new(AtomicI32::new(proc.pid().as_raw()));
        Ok(Self {
            proc: Some(proc),
            live_pid,
            config,
            id,
            tasks_completed: 0,
            restarts: 0,
            stop_timeout,
        })
    }

    /// Ensure the worker is ready, respawning if needed.
    fn ensure_ready(&mut self) -> Result<()> {
        if self.proc.is_none() {
            self.restarts += 1;
            info!(worker_id = self.id, restarts = self.restarts, "Respawning outer worker");
            self.proc = Some(spawn_worker(&self.config)?);
            self.publish_pid();
            self.wait_for_ready()?;
        }
        Ok(())
    }

    fn publish_pid(&self) {
        let pid = self.proc.as_ref().map_or(0, |p| p.pid().as_raw());
        self.live_pid.store(pid, Ordering::SeqCst);
    }

    fn proc_mut(&mut self) -> Result<&mut WorkerProc> {
        let id = self.id;
        self.proc
            .as_mut()
            .ok_or_else(|| MmError::Worker(format!("outer worker {} not available", id)))
    }

    /// Wait for the worker to signal ready.
    fn wait_for_ready(&mut self) -> Result<()> {
        let id = self.id;
        match self.proc_mut()?.recv()? {
            Some(WorkResponse::Ready) => Ok(()),
            Some(other) => Err(MmError::Worker(format!(
                "outer worker {} sent unexpected response instead of Ready: {:?}",
                id, other
            ))),
            None => Err(MmError::Worker(format!(
                "outer worker {} closed connection before Ready",
                id
            ))),
        }
    }

    /// Evaluate one task on this worker.
    ///
    /// Returns a result for every task that reached the worker, including
    /// failures caused by the worker dying mid-task. `Err` means the worker
    /// cannot be (re)started and the task was never run.
    fn evaluate(
        &mut self,
        task: &TaskDescriptor,
        evaluator: &EvaluatorSpec,
    ) -> Result<EvaluationResult> {
        self.ensure_ready()?;

        let request = WorkRequest::evaluate(task, evaluator);
        if let Err(e) = self.proc_mut()?.send(&request) {
            // Died while idle: nothing of this task ran yet, so a fresh worker may take it.
            warn!(worker_id = self.id, error = %e, "Outer worker unreachable, respawning");
            self.discard();
            self.ensure_ready()?;
            self.proc_mut()?.send(&request)?;
        }

        let response = self.proc_mut()?.recv();
        let result = match response {
            Ok(Some(WorkResponse::Result { result })) if result.id == task.id => result,
            Ok(Some(WorkResponse::Result { result })) => {
                self.discard();
                return Ok(EvaluationResult::failed(
                    task.id,
                    format!(
                        "outer worker {} answered for combination {} instead of {}",
                        self.id, result.id, task.id
                    ),
                ));
            }
            Ok(Some(WorkResponse::Error { message })) => EvaluationResult::failed(
                task.id,
                format!("outer worker {} rejected task: {}", self.id, message),
            ),
            Ok(Some(WorkResponse::Ready)) => {
                self.discard();
                return Ok(EvaluationResult::failed(
                    task.id,
                    format!("outer worker {} sent Ready instead of a result", self.id),
                ));
            }
            Ok(None) => {
                let failure = self.handle_death(task);
                return Ok(EvaluationResult::failed(task.id, failure.to_string()));
            }
            Err(e) => {
                self.discard();
                return Ok(EvaluationResult::failed(task.id, e.to_string()));
            }
        };

        self.tasks_completed += 1;
        self.consume_ready();
        Ok(result)
    }

    /// Consume the Ready that follows every answer. A worker that does not
    /// send it is discarded and respawned on the next task.
    fn consume_ready(&mut self) {
        let Some(proc) = self.proc.as_mut() else {
            return;
        };
        match proc.recv() {
            Ok(Some(WorkResponse::Ready)) => {}
            other => {
                debug!(
                    worker_id = self.id,
                    response = ?other.ok().flatten(),
                    "Outer worker did not return to Ready"
                );
                self.discard();
            }
        }
    }

    /// Classify the death of a worker that owned `task`. The worker is
    /// respawned lazily before its next task.
    fn handle_death(&mut self, task: &TaskDescriptor) -> WorkerFailure {
        let name = format!("outer worker {}", self.id);
        let proc = self.proc.take();
        self.publish_pid();
        let reason = match proc {
            Some(mut proc) => proc.reap(self.stop_timeout),
            None => TerminationReason::Unknown,
        };
        let failure = WorkerFailure::new(name, reason)
            .with_context(format!("evaluating combination {}", task.id));

        warn!(
            worker_id = self.id,
            id = task.id,
            emodel = %task.emodel,
            crash = failure.reason.is_crash(),
            "{}",
            failure
        );
        failure
    }

    /// Drop the current process; it is replaced before the next task.
    fn discard(&mut self) {
        if let Some(mut proc) = self.proc.take() {
            self.publish_pid();
            let _ = proc.kill();
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut proc) = self.proc.take() {
            self.publish_pid();
            let _ = proc.stop(self.stop_timeout);
        }
    }
}

/// SIGKILL the process group of every live outer worker. Each outer worker
/// leads its own group, which also holds its inner worker and evaluator.
fn kill_slots(live_pids: &[Arc<AtomicI32>]) {
    for slot in live_pids {
        let pid = slot.load(Ordering::SeqCst);
        if pid > 0 {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}

/// Counters from one scheduling run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRunStats {
    /// Tasks handed to the pool.
    pub submitted: usize,
    /// Results delivered to the caller.
    pub delivered: usize,
    /// Whether dispatch stopped before the queue was drained.
    pub stopped_early: bool,
}

/// A pool of outer worker processes.
pub struct WorkerPool {
    workers: Vec<OuterWorker>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Spawn the outer workers and wait until all are ready.
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        if config.worker_count == 0 {
            return Err(MmError::Config("worker pool needs at least one worker".into()));
        }

        info!(workers = config.worker_count, "Initializing worker pool");

        let mut workers = Vec::with_capacity(config.worker_count);
        for id in 0..config.worker_count {
            let worker_config = WorkerConfig::outer(config.worker_exe.clone());
            workers.push(OuterWorker::new(id, worker_config, config.stop_timeout)?);
        }

        for worker in &mut workers {
            let id = worker.id;
            worker.wait_for_ready().map_err(|e| {
                MmError::Worker(format!("outer worker {} failed to initialize: {}", id, e))
            })?;
        }

        info!(workers = config.worker_count, "All workers ready");

        Ok(Self { workers, config })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Evaluate `tasks` across the pool, handing each result to `on_result`
    /// on the calling thread in completion order.
    ///
    /// Dispatch stops once `shutdown` is set or `on_result` fails. After a
    /// shutdown request, tasks already running still finish and are
    /// delivered. After an `on_result` failure the outer workers are killed
    /// with their in-flight tasks, so the error is returned without waiting
    /// on evaluations that may never end.
    pub fn run_unordered<F>(
        &mut self,
        tasks: Vec<TaskDescriptor>,
        evaluator: &EvaluatorSpec,
        shutdown: &AtomicBool,
        mut on_result: F,
    ) -> Result<PoolRunStats>
    where
        F: FnMut(EvaluationResult) -> Result<()>,
    {
        let mut stats = PoolRunStats {
            submitted: tasks.len(),
            ..Default::default()
        };
        if tasks.is_empty() {
            return Ok(stats);
        }

        let (task_tx, task_rx) = unbounded::<TaskDescriptor>();
        for task in tasks {
            // Receiver is alive in this scope; send cannot fail.
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let (result_tx, result_rx) = bounded::<EvaluationResult>(self.workers.len());
        let live_pids: Vec<Arc<AtomicI32>> =
            self.workers.iter().map(|w| w.live_pid.clone()).collect();
        let mut first_error = None;

        std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(self.workers.len());
            for worker in self.workers.iter_mut() {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                handles.push(s.spawn(move || {
                    while !shutdown.load(Ordering::SeqCst) {
                        let Ok(task) = task_rx.recv() else {
                            break;
                        };
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        match worker.evaluate(&task, evaluator) {
                            Ok(result) => {
                                if result_tx.send(result).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(
                                    worker_id = worker.id,
                                    id = task.id,
                                    error = %e,
                                    "Outer worker unavailable, leaving its slot idle"
                                );
                                break;
                            }
                        }
                    }
                }));
            }
            drop(result_tx);

            for result in result_rx.iter() {
                let id = result.id;
                if let Err(e) = on_result(result) {
                    error!(id, error = %e, "Result could not be stored, aborting run");
                    shutdown.store(true, Ordering::SeqCst);
                    first_error = Some(e);
                    break;
                }
                stats.delivered += 1;
            }
            // Unblock scheduler threads waiting on a full result channel.
            drop(result_rx);

            if first_error.is_some() {
                // Slots blocked on a running evaluation see EOF once killed.
                // Repeat until every slot has unwound, in case one was
                // respawned in between.
                while !handles.iter().all(|h| h.is_finished()) {
                    kill_slots(&live_pids);
                    std::thread::sleep(ABORT_POLL_INTERVAL);
                }
            }
        });

        // Tasks taken by a slot that could not be restarted count as undelivered.
        stats.stopped_early = stats.delivered < stats.submitted;
        debug!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            stopped_early = stats.stopped_early,
            "Pool run finished"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// Shutdown all workers gracefully.
    pub fn shutdown(&mut self) {
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            worker_count: self.workers.len(),
            total_tasks_completed: self.workers.iter().map(|w| w.tasks_completed).sum(),
            total_restarts: self.workers.iter().map(|w| w.restarts).sum(),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    pub worker_count: usize,
    pub total_tasks_completed: usize,
    pub total_restarts: usize,
}
