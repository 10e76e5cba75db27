//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use crate::worker::WorkerRole;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Evaluate emodel × morphology combinations in isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "mmscore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    /// Log filter directives (e.g. "info,mmscore::worker=debug").
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log record format.
    #[arg(long, value_enum, env = "MMSCORE_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate every pending combination and store the scores.
    Run(RunArgs),

    /// Show how many combinations are scored, failed and pending.
    Status(StatusArgs),

    /// Mark failed combinations as pending again.
    ResetFailed(ConfigArg),

    /// Internal worker mode.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Run configuration file argument.
#[derive(Parser, Debug)]
pub struct ConfigArg {
    /// Path to the JSON run configuration.
    #[arg(env = "MMSCORE_CONFIG")]
    pub config: PathBuf,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Number of outer workers (default: from config, else one per CPU).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Evaluate previously failed combinations again.
    #[arg(long)]
    pub retry_failed: bool,

    /// Disable the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub config: ConfigArg,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormatArg::Table)]
    pub format: OutputFormatArg,
}

/// Arguments for the internal worker mode.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(long, value_enum)]
    pub role: WorkerRole,
}

/// Output format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Human-readable summary.
    #[default]
    Table,
    /// JSON output.
    Json,
}

/// Verbosity level for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// -q: errors only.
    Quiet,
    /// Default: progress and per-result records.
    Normal,
    /// -v: include worker lifecycle and evaluator details.
    Debug,
    /// -vv: include IPC traffic.
    Trace,
}

impl Cli {
    /// Get the verbosity level based on -v/-q flags.
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parsing() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let args = Cli::try_parse_from(["mmscore", "run", "mm.json"]).unwrap();
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.config.config, PathBuf::from("mm.json"));
                assert!(run.jobs.is_none());
                assert!(!run.retry_failed);
                assert!(!run.no_progress);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let args = Cli::try_parse_from([
            "mmscore",
            "run",
            "mm.json",
            "-j",
            "8",
            "--retry-failed",
            "--no-progress",
        ])
        .unwrap();
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.jobs, Some(8));
                assert!(run.retry_failed);
                assert!(run.no_progress);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_status_json() {
        let args = Cli::try_parse_from(["mmscore", "status", "mm.json", "--format", "json"]).unwrap();
        match args.command {
            Commands::Status(status) => assert_eq!(status.format, OutputFormatArg::Json),
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_reset_failed_command() {
        let args = Cli::try_parse_from(["mmscore", "reset-failed", "mm.json"]).unwrap();
        assert!(matches!(args.command, Commands::ResetFailed(_)));
    }

    #[test]
    fn test_hidden_worker_command() {
        let args = Cli::try_parse_from(["mmscore", "worker", "--role", "inner"]).unwrap();
        match args.command {
            Commands::Worker(worker) => assert_eq!(worker.role, WorkerRole::Inner),
            _ => panic!("Expected Worker command"),
        }
        assert!(Cli::try_parse_from(["mmscore", "worker", "--role", "middle"]).is_err());
    }

    #[test]
    fn test_global_options() {
        let args = Cli::try_parse_from(["mmscore", "status", "mm.json", "-vv", "--no-color"]).unwrap();
        assert_eq!(args.verbosity(), Verbosity::Trace);
        assert!(args.no_color);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["mmscore", "-v", "-q", "status", "mm.json"]);
        assert!(result.is_err());
    }
}
