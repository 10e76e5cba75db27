//! Two-level worker process pool.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │  Parent Process │
//!                     │  (collector)    │
//!                     └────────┬────────┘
//!               ┌──────────────┼──────────────┐
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │  Outer 1  │  │  Outer 2  │  │  Outer N  │   long-lived
//!         └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │  Inner    │  │  Inner    │  │  Inner    │   one per task
//!         │ evaluator │  │ evaluator │  │ evaluator │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! Workers are this executable in `worker --role <role>` mode, talking
//! newline-delimited JSON over stdin/stdout.

mod ipc;
mod isolated;
mod pool;
mod proc;
mod protocol;
mod signals;
mod spawn;
pub mod worker_main;

pub use pool::{PoolRunStats, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
pub use protocol::{WorkRequest, WorkResponse};
pub use signals::TerminationReason;
pub use spawn::{DAEMON_ENV, WorkerRole, children_permitted};
pub use worker_main::run_worker_main;
