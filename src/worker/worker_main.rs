//! Worker subprocess entry points.
//!
//! Runs when `mmscore worker --role <role>` is invoked. Requests arrive on
//! stdin and responses leave on stdout, so nothing else may write to stdout
//! in a worker; logs go to stderr.

use super::ipc::{LineReader, LineWriter};
use super::isolated::run_isolated;
use super::protocol::{WorkRequest, WorkResponse};
use super::spawn::WorkerRole;
use crate::engine::evaluator::evaluate_task;
use crate::engine::task::EvaluationResult;
use std::io::{self, Read, Write};
use tracing::{debug, error};

fn send<W: Write>(writer: &mut LineWriter<W>, response: &WorkResponse) -> io::Result<()> {
    let line = response.to_line().map_err(io::Error::other)?;
    writer.write_line(&line)
}

/// Outer worker loop.
///
/// Announces readiness, then runs every `Evaluate` request in a fresh inner
/// worker and announces readiness again. Returns on `Exit` or EOF.
fn outer_loop<R: Read, W: Write>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
) -> io::Result<()> {
    send(writer, &WorkResponse::Ready)?;

    loop {
        let line = match reader.read_line()? {
            Some(line) => line.to_string(),
            None => return Ok(()),
        };

        let request = match WorkRequest::from_line(&line) {
            Ok(req) => req,
            Err(e) => {
                send(writer, &WorkResponse::error(format!("invalid request: {}", e)))?;
                send(writer, &WorkResponse::Ready)?;
                continue;
            }
        };

        match request {
            WorkRequest::Exit => return Ok(()),
            WorkRequest::Evaluate { task, evaluator } => {
                debug!(id = task.id, emodel = %task.emodel, "Outer worker received task");
                let result = run_isolated(&task, &evaluator, None);
                send(writer, &WorkResponse::result(result))?;
                send(writer, &WorkResponse::Ready)?;
            }
        }
    }
}

/// Inner worker: evaluate exactly one request, answer and return.
fn inner_once<R: Read, W: Write>(
    reader: &mut LineReader<R>,
    writer: &mut LineWriter<W>,
) -> io::Result<()> {
    let line = match reader.read_line()? {
        Some(line) => line.to_string(),
        None => return Ok(()),
    };

    match WorkRequest::from_line(&line) {
        Ok(WorkRequest::Evaluate { task, evaluator }) => {
            let outcome = evaluate_task(&task, &evaluator);
            let result = EvaluationResult {
                id: task.id,
                outcome,
            };
            send(writer, &WorkResponse::result(result))
        }
        Ok(WorkRequest::Exit) => Ok(()),
        Err(e) => send(writer, &WorkResponse::error(format!("invalid request: {}", e))),
    }
}

/// Run the worker subprocess main function. Never returns.
pub fn run_worker_main(role: WorkerRole) -> ! {
    // Ignore SIGPIPE - pipe errors surface as io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let mut reader = LineReader::new(io::stdin().lock());
    let mut writer = LineWriter::new(io::stdout().lock());

    let outcome = match role {
        WorkerRole::Outer => outer_loop(&mut reader, &mut writer),
        WorkerRole::Inner => inner_once(&mut reader, &mut writer),
    };

    match outcome {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(role = %role, error = %e, "Worker I/O failed");
            std::process::exit(1);
        }
    }
}
