//! mmscore - emodel × morphology scoring

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr, Stream::Stdout};

use mmscore::cli::{Cli, Commands, ConfigArg, OutputFormatArg, RunArgs, StatusArgs, Verbosity};
use mmscore::db::queries::StoreSummary;
use mmscore::engine::{self, EngineConfig, RunReport};
use mmscore::logging::{self, LOG_FILTER_ENV, LOG_FORMAT_ENV, LogConfig};
use mmscore::worker::run_worker_main;
use mmscore::{MmError, RunConfig};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let result = match &cli.command {
        Commands::Worker(args) => {
            logging::init(LogConfig::for_worker().with_ansi(!cli.no_color));
            run_worker_main(args.role)
        }
        Commands::Run(args) => {
            init_logging(&cli);
            cmd_run(&cli, args)
        }
        Commands::Status(args) => {
            init_logging(&cli);
            cmd_status(args)
        }
        Commands::ResetFailed(args) => {
            init_logging(&cli);
            cmd_reset_failed(&cli, args)
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Configure logging from the global flags and export the result so
/// worker processes log the same way.
fn init_logging(cli: &Cli) {
    let mut config = LogConfig::new().with_ansi(!cli.no_color);

    if let Some(filter) = &cli.log_level {
        config = config.with_filter(filter.clone());
    } else {
        match cli.verbosity() {
            Verbosity::Quiet => config = config.with_filter("error"),
            Verbosity::Normal => {}
            Verbosity::Debug => config = config.with_filter("debug"),
            Verbosity::Trace => config = config.with_filter("trace"),
        }
    }
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    let config = config.with_env_overrides();

    // Safety: called once at startup, before any thread or worker exists.
    unsafe {
        std::env::set_var(LOG_FILTER_ENV, config.directives());
        std::env::set_var(LOG_FORMAT_ENV, config.format.to_string());
        if cli.no_color {
            std::env::set_var("NO_COLOR", "1");
        }
    }

    logging::init(config);
}

fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let run_config = load_config(&args.config)?;

    let show_progress = !cli.quiet && !args.no_progress && std::io::stderr().is_terminal();
    let mut config = EngineConfig::new(run_config)
        .with_retry_failed(args.retry_failed)
        .with_progress(show_progress);
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        config = config.with_workers(jobs);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, finishing running evaluations...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let report = match engine::run(&config, &shutdown) {
        Ok(report) => report,
        Err(e @ MmError::Persist { .. }) => {
            return Err(e).context("run aborted, remaining combinations left pending");
        }
        Err(e) => return Err(e.into()),
    };

    if !cli.quiet {
        print_report(&report);
    }
    if report.incomplete {
        bail!(
            "outer workers could not be restarted; {} combination(s) left pending",
            report.store.pending
        );
    }
    Ok(())
}

fn cmd_status(args: &StatusArgs) -> Result<()> {
    let run_config = load_config(&args.config)?;
    let summary = engine::status(&run_config)?;

    match args.format {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormatArg::Table => print_summary(&summary),
    }
    Ok(())
}

fn cmd_reset_failed(cli: &Cli, args: &ConfigArg) -> Result<()> {
    let run_config = load_config(args)?;
    let reset = engine::reset_failed(&run_config)?;
    if !cli.quiet {
        eprintln!("Reset {} failed combination(s) to pending.", reset);
    }
    Ok(())
}

fn load_config(arg: &ConfigArg) -> Result<RunConfig> {
    RunConfig::load(&arg.config)
        .with_context(|| format!("failed to load run configuration {}", arg.config.display()))
}

fn print_report(report: &RunReport) {
    eprintln!();
    if report.interrupted {
        eprintln!(
            "{}",
            "Run interrupted.".if_supports_color(Stderr, |text| text.yellow())
        );
    } else if report.incomplete {
        eprintln!(
            "{}",
            format!("Run incomplete: {} pending.", report.store.pending)
                .if_supports_color(Stderr, |text| text.red())
        );
    } else {
        eprintln!(
            "{}",
            "Run complete!".if_supports_color(Stderr, |text| text.green())
        );
    }
    eprintln!("  Combinations enumerated: {}", report.enumerated);
    eprintln!("  Scored this run: {}", report.scored);
    eprintln!("  Failed this run: {}", report.failed);
    eprintln!();
    eprintln!("Store:");
    eprintln!("  Total:   {}", report.store.total);
    eprintln!("  Scored:  {}", report.store.scored);
    eprintln!("  Failed:  {}", report.store.failed);
    eprintln!("  Pending: {}", report.store.pending);

    if report.store.failed > 0 {
        eprintln!();
        eprintln!("Failed combinations keep their error in the 'exception' column.");
        eprintln!("Use `mmscore run --retry-failed` to evaluate them again.");
    }
}

fn print_summary(summary: &StoreSummary) {
    println!("Total:   {}", summary.total);
    println!(
        "Scored:  {}",
        summary
            .scored
            .if_supports_color(Stdout, |text| text.green())
    );
    println!(
        "Failed:  {}",
        summary.failed.if_supports_color(Stdout, |text| text.red())
    );
    println!(
        "Pending: {}",
        summary
            .pending
            .if_supports_color(Stdout, |text| text.yellow())
    );
}
