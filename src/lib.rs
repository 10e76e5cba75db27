//! mmscore - isolated parallel evaluation of emodel × morphology combinations.
//!
//! Pending combinations live in a SQLite `scores` table. A run evaluates each
//! of them in its own single-use worker process, hosted by a fixed pool of
//! long-lived outer workers, and writes every result back as it arrives.

pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod worker;

pub use config::{EvaluatorSpec, RunConfig};
pub use engine::{EngineConfig, RunReport};
pub use error::{MmError, Result};
